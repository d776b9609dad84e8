use bit_field::BitField;
use x86_64::registers::control::{Cr0Flags, Cr4Flags};
use x86_64::registers::rflags::RFlags;

use crate::regs::GeneralRegisters;
use crate::segmentation::{DescriptorTable, Segment};
use crate::svm::NestedSvmState;
use crate::{Result, SvmError};

/// Architectural state of one virtual CPU, as seen by the guest hypervisor.
///
/// Owned by the [`SvmVcpu`](crate::SvmVcpu) and mutated in place by the
/// VMRUN, #VMEXIT and VMMCALL handlers.
#[derive(Debug)]
pub struct GuestCpuContext {
    pub regs: GeneralRegisters,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: RFlags,

    pub es: Segment,
    pub cs: Segment,
    pub ss: Segment,
    pub ds: Segment,
    pub fs: Segment,
    pub gs: Segment,
    pub gdtr: DescriptorTable,
    pub idtr: DescriptorTable,

    pub cr0: Cr0Flags,
    pub cr3: u64,
    pub cr4: Cr4Flags,
    pub efer: u64,

    /// Nested hardware-virtualization (SVM) state.
    pub hwvirt: NestedSvmState,
}

impl Default for GuestCpuContext {
    fn default() -> Self {
        Self {
            regs: GeneralRegisters::default(),
            rip: 0,
            rsp: 0,
            // Bit 1 is reserved and always reads as 1.
            rflags: RFlags::from_bits_retain(0x2),
            es: Segment::invalid(),
            cs: Segment::invalid(),
            ss: Segment::invalid(),
            ds: Segment::invalid(),
            fs: Segment::invalid(),
            gs: Segment::invalid(),
            gdtr: DescriptorTable::default(),
            idtr: DescriptorTable::default(),
            cr0: Cr0Flags::empty(),
            cr3: 0,
            cr4: Cr4Flags::empty(),
            efer: 0,
            hwvirt: NestedSvmState::default(),
        }
    }
}

impl GuestCpuContext {
    /// The low 32 bits of RIP.
    pub fn eip(&self) -> u32 {
        self.rip.get_bits(0..32) as u32
    }

    /// Advances RIP past an emulated instruction and clears RFLAGS.RF.
    pub fn advance_rip(&mut self, instr_len: u8) {
        self.rip = self.rip.wrapping_add(instr_len as u64);
        self.rflags.remove(RFlags::RESUME_FLAG);
    }

    /// Reads the low dword of a general-purpose register by its encoding.
    pub fn gpr32(&self, index: u32) -> Result<u32> {
        match index {
            4 => Ok(self.rsp as u32),
            0..=15 => Ok(self.regs.get_reg_of_index(index as u8) as u32),
            _ => Err(SvmError::InvalidOperand {
                index,
                rip_updated: false,
            }),
        }
    }

    /// Writes the low dword of a general-purpose register by its encoding,
    /// zero-extending into the full register.
    pub fn set_gpr32(&mut self, index: u32, value: u32) -> Result {
        match index {
            4 => self.rsp = value as u64,
            0..=15 => self.regs.set_reg_of_index(index as u8, value as u64),
            _ => {
                return Err(SvmError::InvalidOperand {
                    index,
                    rip_updated: false,
                });
            }
        }
        Ok(())
    }
}
