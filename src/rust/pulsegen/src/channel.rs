// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::core_profile::CoreProfile;
use crate::{Error, Result};
use anyhow::anyhow;
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Immutable mapping from symbolic channel names to hardware bit indices.
///
/// Built once per controller and never mutated afterwards. Every index is
/// unique and within the core's channel range.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    map: IndexMap<String, u8>,
    channel_count: usize,
}

impl ChannelRegistry {
    pub fn new(
        profile: &CoreProfile,
        names: impl IntoIterator<Item = (String, u8)>,
    ) -> Result<Self> {
        let mut map = IndexMap::new();
        let mut taken = vec![false; profile.channel_count];
        for (name, index) in names {
            if index as usize >= profile.channel_count {
                return Err(anyhow!(
                    "channel '{name}' index {index} out of range for core {}",
                    profile.name
                )
                .into());
            }
            if taken[index as usize] {
                return Err(anyhow!("channel bit {index} assigned twice").into());
            }
            taken[index as usize] = true;
            if map.insert(name.clone(), index).is_some() {
                return Err(anyhow!("duplicate channel name '{name}'").into());
            }
        }
        Ok(ChannelRegistry {
            map,
            channel_count: profile.channel_count,
        })
    }

    /// Default naming `ch0..chN-1`, one name per hardware bit.
    pub fn with_default_names(profile: &CoreProfile) -> Self {
        let map = (0..profile.channel_count)
            .map(|i| (format!("ch{i}"), i as u8))
            .collect();
        ChannelRegistry {
            map,
            channel_count: profile.channel_count,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn index_of(&self, name: &str) -> Result<u8> {
        self.map
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidChannel(name.to_string()))
    }

    /// Per-channel activity flags for one instruction pattern.
    pub(crate) fn lane_flags(&self, channels: &BTreeSet<String>) -> Result<Vec<bool>> {
        let mut flags = vec![false; self.channel_count];
        for name in channels {
            flags[self.index_of(name)? as usize] = true;
        }
        Ok(flags)
    }

    /// Resolve a set of names into a static-output bitmask.
    pub fn mask_of<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<u32> {
        let mut mask = 0u32;
        for name in names {
            mask |= 1 << self.index_of(name)?;
        }
        Ok(mask)
    }
}

/// Static output selection: either a raw bitmask, one bit per channel, or a
/// set of channel names driven high while all others stay low.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSelection {
    Mask(u32),
    Names(BTreeSet<String>),
}

impl OutputSelection {
    pub fn resolve(&self, registry: &ChannelRegistry) -> Result<u32> {
        match self {
            OutputSelection::Mask(mask) => Ok(*mask),
            OutputSelection::Names(names) => registry.mask_of(names.iter().map(String::as_str)),
        }
    }
}
