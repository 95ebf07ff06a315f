// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::fmt::Display;

use serde::Serialize;

/// What a run skipped or flagged without failing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub skipped_instances: Vec<String>,
    pub skipped_units:     Vec<String>,
    /// Instances whose diagonal exceeds the configured limit
    pub oversized:         Vec<String>,
}

impl Diagnostics {
    pub fn skip_instance(
        &mut self,
        name: impl Display,
        reason: impl Display,
    ) {
        tracing::warn!(instance = %name, %reason, "instance skipped");
        self.skipped_instances.push(format!("{name}: {reason}"));
    }

    pub fn skip_unit(
        &mut self,
        name: impl Display,
        reason: impl Display,
    ) {
        tracing::warn!(unit = %name, %reason, "content skipped");
        self.skipped_units.push(format!("{name}: {reason}"));
    }

    pub fn oversized(
        &mut self,
        name: impl Display,
        diagonal: f64,
        limit: f64,
    ) {
        tracing::warn!(instance = %name, diagonal, limit, "geometric error above limit");
        self.oversized.push(format!("{name}: {diagonal:.1} > {limit:.1}"));
    }

    pub fn merge(
        &mut self,
        other: Self,
    ) {
        self.skipped_instances.extend(other.skipped_instances);
        self.skipped_units.extend(other.skipped_units);
        self.oversized.extend(other.oversized);
    }

    pub fn is_clean(&self) -> bool {
        self.skipped_instances.is_empty() && self.skipped_units.is_empty() && self.oversized.is_empty()
    }
}
