use core::fmt;

use axerrno::AxError;

/// Errors of the nested SVM handlers.
///
/// The TPR patch emulation errors carry `rip_updated`, which tells whether
/// earlier patches of the same chain already advanced RIP (and possibly
/// changed the TPR) before the failing record was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvmError {
    /// No TPR patch record exists at the current EIP.
    PatchNotFound,
    /// A TPR patch record has a kind that cannot be emulated here.
    UnexpectedPatchType { kind: u32, rip_updated: bool },
    /// A TPR patch record names a register that does not exist.
    InvalidOperand { index: u32, rip_updated: bool },
    /// A TPR patch record has a zero instruction length.
    InvalidPatchLength { rip_updated: bool },
    /// The virtual APIC rejected a TPR access.
    Apic { err: AxError, rip_updated: bool },
    /// Neither TPR patching nor paravirtualized hypercalls handled the VMMCALL.
    NotAvailable,
    /// Reading guest-physical memory failed.
    GuestMemory(AxError),
    /// The hypercall provider failed.
    Hypercall(AxError),
    /// The operation reached a part of nested SVM that is not implemented.
    NotImplemented,
    /// A #VMEXIT was requested while the vCPU is not running a nested guest.
    UnexpectedVmexit {
        exit_code: u64,
        exit_info_1: u64,
        exit_info_2: u64,
    },
}

/// A specialized [`Result`](core::result::Result) type for nested SVM.
pub type Result<T = ()> = core::result::Result<T, SvmError>;

impl SvmError {
    /// Returns `true` if the caller is expected to fall back instead of
    /// failing the instruction.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PatchNotFound | Self::NotAvailable)
    }

    /// Whether RIP was already advanced when the error occurred.
    pub fn rip_updated(&self) -> bool {
        match *self {
            Self::UnexpectedPatchType { rip_updated, .. }
            | Self::InvalidOperand { rip_updated, .. }
            | Self::InvalidPatchLength { rip_updated }
            | Self::Apic { rip_updated, .. } => rip_updated,
            _ => false,
        }
    }

    /// Sets `rip_updated` on the variants that carry it.
    pub(crate) fn with_rip_updated(mut self, updated: bool) -> Self {
        match &mut self {
            Self::UnexpectedPatchType { rip_updated, .. }
            | Self::InvalidOperand { rip_updated, .. }
            | Self::InvalidPatchLength { rip_updated }
            | Self::Apic { rip_updated, .. } => *rip_updated = updated,
            _ => {}
        }
        self
    }
}

impl fmt::Display for SvmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PatchNotFound => write!(f, "no TPR patch record at the current EIP"),
            Self::UnexpectedPatchType { kind, .. } => write!(f, "unexpected TPR patch type {kind}"),
            Self::InvalidOperand { index, .. } => write!(f, "invalid register operand {index}"),
            Self::InvalidPatchLength { .. } => write!(f, "TPR patch with zero instruction length"),
            Self::Apic { err, .. } => write!(f, "virtual APIC access failed: {err:?}"),
            Self::NotAvailable => write!(f, "no hypercall interface available"),
            Self::GuestMemory(err) => write!(f, "guest-physical memory access failed: {err:?}"),
            Self::Hypercall(err) => write!(f, "hypercall failed: {err:?}"),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::UnexpectedVmexit {
                exit_code,
                exit_info_1,
                exit_info_2,
            } => write!(
                f,
                "#VMEXIT outside of SVM guest mode: exit_code={exit_code:#x} \
                 exit_info_1={exit_info_1:#x} exit_info_2={exit_info_2:#x}"
            ),
        }
    }
}
