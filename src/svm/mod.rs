mod definitions;
mod nested;
mod tpr;
mod vcpu;
mod vmcb;

pub use self::definitions::{SvmExitCode, SvmIntercept};
pub use self::nested::{NestedSvmState, SvmHostState};
pub use self::tpr::{TprInstrKind, TprPatch, TprPatchLookup, TprPatchTable};
pub use self::vcpu::{ChangedFlags, SvmVcpu, SvmVcpuConfig, SvmVm, SvmVmConfig, VmmcallExit};
pub use self::vmcb::{SvmExitInfo, VMCB_CONTROL_AREA_SIZE, VmcbControlArea};

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
        /// Whether the host CPU supports AMD-V.
        pub fn has_hardware_support() -> bool {
            if let Some(ext) = raw_cpuid::CpuId::new().get_extended_processor_and_feature_identifiers()
            {
                ext.has_svm()
            } else {
                false
            }
        }

        /// Whether the host CPU supports nested paging, which can then be
        /// exposed to guest hypervisors.
        pub fn has_nested_paging_support() -> bool {
            raw_cpuid::CpuId::new()
                .get_svm_info()
                .is_some_and(|svm| svm.has_nested_paging())
        }
    } else {
        pub fn has_hardware_support() -> bool {
            false
        }

        pub fn has_nested_paging_support() -> bool {
            false
        }
    }
}
