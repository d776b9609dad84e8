// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use x86::segmentation::SegmentSelector;

/// A segment register with its hidden part, in the same shape as a VMCB
/// segment (selector, attributes, limit, base).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub selector: SegmentSelector,
    /// Packed VMCB attribute format (type, S, DPL, P, AVL, L, D/B, G).
    pub attr: u16,
    pub limit: u32,
    pub base: u64,
}

impl Segment {
    /// A null segment.
    pub const fn invalid() -> Self {
        Self {
            selector: SegmentSelector::from_raw(0),
            attr: 0,
            limit: 0,
            base: 0,
        }
    }

    /// A flat segment covering the whole address space.
    pub const fn flat(selector: u16, attr: u16) -> Self {
        Self {
            selector: SegmentSelector::from_raw(selector),
            attr,
            limit: 0xffff_ffff,
            base: 0,
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::invalid()
    }
}

/// GDTR / IDTR.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTable {
    pub base: u64,
    pub limit: u32,
}
