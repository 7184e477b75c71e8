// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Pretrained German base models available for fine-tuning

use crate::error::EnsembleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pretrained transformer used as the starting point for a sub-model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseModel {
    GBert,
    GElectra,
    GottBert,
}

impl BaseModel {
    pub const ALL: [BaseModel; 3] = [BaseModel::GBert, BaseModel::GElectra, BaseModel::GottBert];

    /// Short name used on the command line and in configs
    pub fn short_name(&self) -> &'static str {
        match self {
            BaseModel::GBert => "gbert",
            BaseModel::GElectra => "gelectra",
            BaseModel::GottBert => "gottbert",
        }
    }

    /// Canonical model hub identifier
    pub fn hub_id(&self) -> &'static str {
        match self {
            BaseModel::GBert => "deepset/gbert-large",
            BaseModel::GElectra => "deepset/gelectra-large",
            BaseModel::GottBert => "uklfr/gottbert-base",
        }
    }

    /// Hub identifier without the organisation prefix, used in checkpoint keys
    pub fn checkpoint_suffix(&self) -> &'static str {
        let id = self.hub_id();
        match id.find('/') {
            Some(pos) => &id[pos + 1..],
            None => id,
        }
    }
}

impl fmt::Display for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for BaseModel {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        BaseModel::ALL
            .into_iter()
            .find(|m| m.short_name() == wanted)
            .ok_or_else(|| EnsembleError::UnknownBaseModel(s.to_string()))
    }
}

/// Parse a comma-separated list such as `gbert,gelectra`
pub fn parse_model_list(list: &str) -> Result<Vec<BaseModel>, EnsembleError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(BaseModel::from_str)
        .collect()
}
