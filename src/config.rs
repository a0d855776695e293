//! Client configuration (spec §6 "Configuration"): validated once at
//! construction time, never later. Mirrors the teacher's `serde`-derived
//! settings structs (`src/main.rs`'s CLI options) generalized to a nested
//! policy tree and erasure-code pattern table.

use serde::Deserialize;

use crate::error::{self, Error};
use crate::policy::{Affinity, DriveId, FragmentClass, Policy, PolicyNode};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyNodeConfig {
    Leaf {
        uuid: DriveId,
        #[serde(default = "default_affinity")]
        affinity: AffinityConfig,
        #[serde(default = "default_ftype")]
        ftype: FragmentClassConfig,
    },
    Internal {
        children: Vec<PolicyNodeConfig>,
        weights: Vec<f64>,
        #[serde(default = "default_affinity")]
        affinity: AffinityConfig,
        #[serde(default = "default_ftype")]
        ftype: FragmentClassConfig,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityConfig {
    Soft,
    Hard,
}

fn default_affinity() -> AffinityConfig {
    AffinityConfig::Hard
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentClassConfig {
    Data,
    Coding,
    Both,
}

fn default_ftype() -> FragmentClassConfig {
    FragmentClassConfig::Both
}

fn to_runtime(node: &PolicyNodeConfig) -> PolicyNode {
    match node {
        PolicyNodeConfig::Leaf { uuid, affinity, ftype } => PolicyNode::Leaf {
            uuid: uuid.clone(),
            affinity: match affinity {
                AffinityConfig::Soft => Affinity::Soft,
                AffinityConfig::Hard => Affinity::Hard,
            },
            ftype: match ftype {
                FragmentClassConfig::Data => FragmentClass::Data,
                FragmentClassConfig::Coding => FragmentClass::Coding,
                FragmentClassConfig::Both => FragmentClass::Both,
            },
        },
        PolicyNodeConfig::Internal { children, weights, affinity, ftype } => PolicyNode::Internal {
            children: children.iter().map(to_runtime).collect(),
            weights: weights.clone(),
            affinity: match affinity {
                AffinityConfig::Soft => Affinity::Soft,
                AffinityConfig::Hard => Affinity::Hard,
            },
            ftype: match ftype {
                FragmentClassConfig::Data => FragmentClass::Data,
                FragmentClassConfig::Coding => FragmentClass::Coding,
                FragmentClassConfig::Both => FragmentClass::Both,
            },
        },
    }
}

fn count_leaves(node: &PolicyNodeConfig) -> usize {
    match node {
        PolicyNodeConfig::Leaf { .. } => 1,
        PolicyNodeConfig::Internal { children, .. } => children.iter().map(count_leaves).sum(),
    }
}

/// An erasure/replication pattern recognized by object-key prefix
/// (`pattern`), e.g. `{ pattern: "default", dataParts: 4, codingParts: 2 }`.
#[derive(Debug, Clone, Deserialize)]
pub struct CodePattern {
    pub pattern: String,
    pub data_parts: u32,
    #[serde(default)]
    pub coding_parts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorAgentConfig {
    pub kafka_brokers: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub policy: PolicyNodeConfig,
    #[serde(default)]
    pub min_split_size: i64,
    pub codes: Vec<CodePattern>,
    pub request_timeout_ms: u64,
    pub error_agent: Option<ErrorAgentConfig>,
}

impl Config {
    /// Validates shape per spec §6: at least one leaf, every code
    /// pattern's `k+m <= leaves`, and a non-negative timeout. Bad shape is
    /// always a construction-time `ConfigError`, never surfaced later.
    pub fn validate(&self) -> error::Result<()> {
        let leaves = count_leaves(&self.policy);
        if leaves == 0 {
            return Err(Error::config("policy has no leaf locations"));
        }

        if self.codes.is_empty() {
            return Err(Error::config("no code patterns configured"));
        }

        for code in &self.codes {
            if code.data_parts == 0 {
                return Err(Error::config(format!("code pattern {:?} has dataParts == 0", code.pattern)));
            }
            let total = code.data_parts + code.coding_parts;
            if total as usize > leaves {
                return Err(Error::config(format!(
                    "code pattern {:?} needs {} locations, policy only has {leaves}",
                    code.pattern, total
                )));
            }
        }

        if let Some(agent) = &self.error_agent {
            if agent.kafka_brokers.trim().is_empty() {
                return Err(Error::config("errorAgent.kafkaBrokers is empty"));
            }
        }

        Ok(())
    }

    pub fn policy(&self) -> Policy {
        Policy { root: to_runtime(&self.policy), min_split_size: self.min_split_size }
    }
}
