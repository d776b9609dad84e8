//! TPR patching for 32-bit guests.
//!
//! Old 32-bit guests hammer the TPR through the memory-mapped APIC page. The
//! patching subsystem rewrites those accesses into a VMMCALL and records what
//! the original instruction did in a [`TprPatch`], keyed by its EIP. When the
//! VMMCALL traps, the access is emulated from that record.

use alloc::collections::BTreeMap;

use axerrno::AxError;
use spin::RwLock;

use super::vcpu::{ChangedFlags, SvmVcpu};
use crate::hal::SvmVcpuHal;
use crate::{Result, SvmError};

numeric_enum_macro::numeric_enum! {
    #[repr(u32)]
    /// What a patched instruction did.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TprInstrKind {
        Invalid = 0,
        // `mov reg, [tpr]`
        Read = 1,
        // `mov reg, [tpr]` followed by `shr reg, 4`
        ReadShr4 = 2,
        // `mov [tpr], reg`
        WriteReg = 3,
        // `mov [tpr], imm`
        WriteImm = 4,
        // The access was replaced by a jump into patch code.
        JumpReplacement = 5,
    }
}

/// A patched TPR access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TprPatch {
    pub kind: TprInstrKind,
    /// Length of the replaced instruction.
    pub op_len: u8,
    /// Source register encoding for [`TprInstrKind::WriteReg`], the value
    /// for [`TprInstrKind::WriteImm`].
    pub src_operand: u32,
    /// Destination register encoding for [`TprInstrKind::Read`].
    pub dst_operand: u32,
}

impl TprPatch {
    pub const fn read(op_len: u8, dst_reg: u32) -> Self {
        Self {
            kind: TprInstrKind::Read,
            op_len,
            src_operand: 0,
            dst_operand: dst_reg,
        }
    }

    pub const fn write_reg(op_len: u8, src_reg: u32) -> Self {
        Self {
            kind: TprInstrKind::WriteReg,
            op_len,
            src_operand: src_reg,
            dst_operand: 0,
        }
    }

    pub const fn write_imm(op_len: u8, value: u32) -> Self {
        Self {
            kind: TprInstrKind::WriteImm,
            op_len,
            src_operand: value,
            dst_operand: 0,
        }
    }
}

/// Lookup of TPR patches by guest EIP.
pub trait TprPatchLookup {
    fn find_patch(&self, eip: u32) -> Option<TprPatch>;
}

/// TPR patches of one VM.
///
/// Filled by the patching subsystem before the vCPUs run; the vCPUs only
/// look records up.
#[derive(Default)]
pub struct TprPatchTable {
    patches: RwLock<BTreeMap<u32, TprPatch>>,
}

impl TprPatchTable {
    pub const fn new() -> Self {
        Self {
            patches: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a patch at `eip`, returning the one it replaces.
    pub fn insert(&self, eip: u32, patch: TprPatch) -> Option<TprPatch> {
        self.patches.write().insert(eip, patch)
    }

    pub fn remove(&self, eip: u32) -> Option<TprPatch> {
        self.patches.write().remove(&eip)
    }

    pub fn clear(&self) {
        self.patches.write().clear();
    }

    pub fn len(&self) -> usize {
        self.patches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.read().is_empty()
    }
}

impl TprPatchLookup for TprPatchTable {
    fn find_patch(&self, eip: u32) -> Option<TprPatch> {
        self.patches.read().get(&eip).copied()
    }
}

impl<H: SvmVcpuHal> SvmVcpu<H> {
    /// Emulates the patched TPR access at the current EIP.
    ///
    /// Runs in a loop since the instruction following a patch may be patched
    /// as well. Every applied patch advances RIP and clears RFLAGS.RF; an
    /// error from a later patch of the chain reports that through
    /// [`SvmError::rip_updated`].
    ///
    /// Returns [`SvmError::PatchNotFound`] if there is no patch at EIP.
    pub(super) fn emulate_mov_tpr(&mut self) -> Result {
        trace!("[HV] emulating VMMCALL TPR access at rip {:#x}", self.ctx.rip);

        let mut rip_updated = false;
        while let Some(patch) = self.vm.tpr_patches.find_patch(self.ctx.eip()) {
            self.apply_tpr_patch(&patch)
                .map_err(|err| err.with_rip_updated(rip_updated))?;
            self.ctx.advance_rip(patch.op_len);
            rip_updated = true;
        }

        if rip_updated {
            Ok(())
        } else {
            Err(SvmError::PatchNotFound)
        }
    }

    fn apply_tpr_patch(&mut self, patch: &TprPatch) -> Result {
        // RIP would never leave the patch.
        if patch.op_len == 0 {
            warn!("[HV] zero-length TPR patch at rip {:#x}", self.ctx.rip);
            return Err(SvmError::InvalidPatchLength { rip_updated: false });
        }

        match patch.kind {
            TprInstrKind::Read => {
                let (tpr, _pending) = self.hal.tpr().map_err(apic_error)?;
                self.ctx.set_gpr32(patch.dst_operand, tpr as u32)
            }
            TprInstrKind::WriteReg => {
                let tpr = self.ctx.gpr32(patch.src_operand)? as u8;
                self.write_tpr(tpr)
            }
            TprInstrKind::WriteImm => self.write_tpr(patch.src_operand as u8),
            TprInstrKind::Invalid | TprInstrKind::ReadShr4 | TprInstrKind::JumpReplacement => {
                warn!(
                    "[HV] unexpected TPR patch type {:?} at rip {:#x}",
                    patch.kind, self.ctx.rip
                );
                self.last_error = patch.kind as u32;
                Err(SvmError::UnexpectedPatchType {
                    kind: patch.kind as u32,
                    rip_updated: false,
                })
            }
        }
    }

    fn write_tpr(&mut self, tpr: u8) -> Result {
        self.hal.set_tpr(tpr).map_err(apic_error)?;
        self.changed.insert(ChangedFlags::GUEST_APIC_STATE);
        Ok(())
    }
}

fn apic_error(err: AxError) -> SvmError {
    SvmError::Apic {
        err,
        rip_updated: false,
    }
}
