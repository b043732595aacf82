// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per persisted entity.

pub mod group_config;
pub mod groups;
pub mod messages;
pub mod roles;
pub mod tasks;
