//! AMD-SVM architectural constants.
//!
//! Reference: AMD64 APM Vol.2, Appendix C "SVM Intercept Exit Codes" and
//! Appendix B "Layout of VMCB".

#![allow(non_camel_case_types)]

numeric_enum_macro::numeric_enum! {
    #[repr(u64)]
    /// #VMEXIT exit codes, as stored in the `EXITCODE` field of the VMCB.
    ///
    /// Codes for the CR/DR/exception ranges that are not listed decode to
    /// `Err(raw)` via [`TryFrom<u64>`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SvmExitCode {
        CR0_READ = 0x00,
        CR3_READ = 0x03,
        CR4_READ = 0x04,
        CR8_READ = 0x08,
        CR0_WRITE = 0x10,
        CR3_WRITE = 0x13,
        CR4_WRITE = 0x14,
        CR8_WRITE = 0x18,
        DR7_READ = 0x27,
        DR7_WRITE = 0x37,
        EXCP_DE = 0x40,
        EXCP_DB = 0x41,
        EXCP_BP = 0x43,
        EXCP_UD = 0x46,
        EXCP_NM = 0x47,
        EXCP_DF = 0x48,
        EXCP_TS = 0x4a,
        EXCP_NP = 0x4b,
        EXCP_SS = 0x4c,
        EXCP_GP = 0x4d,
        EXCP_PF = 0x4e,
        EXCP_MF = 0x50,
        EXCP_AC = 0x51,
        EXCP_MC = 0x52,
        EXCP_XF = 0x53,
        INTR = 0x60,
        NMI = 0x61,
        SMI = 0x62,
        INIT = 0x63,
        VINTR = 0x64,
        CR0_SEL_WRITE = 0x65,
        IDTR_READ = 0x66,
        GDTR_READ = 0x67,
        LDTR_READ = 0x68,
        TR_READ = 0x69,
        IDTR_WRITE = 0x6a,
        GDTR_WRITE = 0x6b,
        LDTR_WRITE = 0x6c,
        TR_WRITE = 0x6d,
        RDTSC = 0x6e,
        RDPMC = 0x6f,
        PUSHF = 0x70,
        POPF = 0x71,
        CPUID = 0x72,
        RSM = 0x73,
        IRET = 0x74,
        SWINT = 0x75,
        INVD = 0x76,
        PAUSE = 0x77,
        HLT = 0x78,
        INVLPG = 0x79,
        INVLPGA = 0x7a,
        IOIO = 0x7b,
        MSR = 0x7c,
        TASK_SWITCH = 0x7d,
        FERR_FREEZE = 0x7e,
        SHUTDOWN = 0x7f,
        VMRUN = 0x80,
        VMMCALL = 0x81,
        VMLOAD = 0x82,
        VMSAVE = 0x83,
        STGI = 0x84,
        CLGI = 0x85,
        SKINIT = 0x86,
        RDTSCP = 0x87,
        ICEBP = 0x88,
        WBINVD = 0x89,
        MONITOR = 0x8a,
        MWAIT = 0x8b,
        MWAIT_CONDITIONAL = 0x8c,
        XSETBV = 0x8d,
        RDPRU = 0x8e,
        EFER_WRITE_TRAP = 0x8f,
        INVLPGB = 0xa0,
        INVLPGB_ILLEGAL = 0xa1,
        INVPCID = 0xa2,
        MCOMMIT = 0xa3,
        TLBSYNC = 0xa4,
        NPF = 0x400,
        AVIC_INCOMPLETE_IPI = 0x401,
        AVIC_NOACCEL = 0x402,
        VMGEXIT = 0x403,
        // Invalid guest state in the VMCB (-1).
        INVALID = 0xffff_ffff_ffff_ffff,
        // The VMSA was busy (-2).
        BUSY = 0xffff_ffff_ffff_fffe,
        // The sibling thread is not in an idle state (-3).
        IDLE_REQUIRED = 0xffff_ffff_ffff_fffd,
        // Invalid PMC state (-4).
        INVALID_PMC = 0xffff_ffff_ffff_fffc,
    }
}

/// Intercepts controlled by the intercept vectors 3 to 5 of the VMCB.
///
/// The discriminant encodes `(vector << 5) | bit`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvmIntercept {
    // Vector 3 (offset 0x0C)
    INTR = 0x60,
    NMI,
    SMI,
    INIT,
    VINTR,
    CR0_SEL_WRITE,
    IDTR_READ,
    GDTR_READ,
    LDTR_READ,
    TR_READ,
    IDTR_WRITE,
    GDTR_WRITE,
    LDTR_WRITE,
    TR_WRITE,
    RDTSC,
    RDPMC,
    PUSHF,
    POPF,
    CPUID,
    RSM,
    IRET,
    SWINT,
    INVD,
    PAUSE,
    HLT,
    INVLPG,
    INVLPGA,
    IOIO_PROT,
    MSR_PROT,
    TASK_SWITCH,
    FERR_FREEZE,
    SHUTDOWN,

    // Vector 4 (offset 0x10)
    VMRUN = 0x80,
    VMMCALL,
    VMLOAD,
    VMSAVE,
    STGI,
    CLGI,
    SKINIT,
    RDTSCP,
    ICEBP,
    WBINVD,
    MONITOR,
    MWAIT,
    MWAIT_CONDITIONAL,
    XSETBV,
    RDPRU,
    EFER_WRITE_TRAP,

    // Vector 5 (offset 0x14)
    INVLPGB = 0xa0,
    INVLPGB_ILLEGAL,
    INVPCID,
    MCOMMIT,
    TLBSYNC,
}

impl SvmIntercept {
    /// Index of the intercept vector holding this intercept.
    pub const fn vector(self) -> usize {
        (self as u8 >> 5) as usize
    }

    /// Bit position inside the intercept vector.
    pub const fn bit(self) -> u32 {
        (self as u8 & 0x1f) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_decoding() {
        assert_eq!(SvmExitCode::try_from(0x81u64), Ok(SvmExitCode::VMMCALL));
        assert_eq!(SvmExitCode::try_from(u64::MAX), Ok(SvmExitCode::INVALID));
        assert_eq!(SvmExitCode::INVALID as u64 as i64, -1);
        assert_eq!(SvmExitCode::INVALID_PMC as u64 as i64, -4);
        // #VMEXIT(EXCP_PIC) is not listed.
        assert_eq!(SvmExitCode::try_from(0x4fu64), Err(0x4f));
    }

    #[test]
    fn intercept_positions() {
        assert_eq!((SvmIntercept::INTR.vector(), SvmIntercept::INTR.bit()), (3, 0));
        assert_eq!((SvmIntercept::SHUTDOWN.vector(), SvmIntercept::SHUTDOWN.bit()), (3, 31));
        assert_eq!((SvmIntercept::VMRUN.vector(), SvmIntercept::VMRUN.bit()), (4, 0));
        assert_eq!((SvmIntercept::VMMCALL.vector(), SvmIntercept::VMMCALL.bit()), (4, 1));
        assert_eq!(
            (SvmIntercept::EFER_WRITE_TRAP.vector(), SvmIntercept::EFER_WRITE_TRAP.bit()),
            (4, 15)
        );
        assert_eq!((SvmIntercept::TLBSYNC.vector(), SvmIntercept::TLBSYNC.bit()), (5, 4));
    }
}
