// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod glob;
mod loader;
mod schema;
mod settings;

pub use glob::glob_match;
pub use loader::load;
pub use schema::*;
pub use settings::Settings;
