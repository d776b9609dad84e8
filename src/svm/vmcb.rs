// vmcb.rs: control area of a guest hypervisor's VMCB
//
// A VMCB is a single 4-KiB page split into a 1024-byte Control Area (offset
// 0x0) and a 3-KiB State-Save Area (offset 0x400). For a nested guest the
// page lives in *guest*-physical memory and belongs to the guest hypervisor:
// on VMRUN we take a private snapshot of its control area, which is what
// every later intercept decision is made against. Guest memory stays
// authoritative, the snapshot is never written back.
//
// Reference: AMD 64 APM v2, Appendix B VMCB Layout

#![allow(non_snake_case)]

use core::mem::size_of;

use axerrno::AxResult;
use bit_field::BitField;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use super::definitions::{SvmExitCode, SvmIntercept};
use crate::hal::{GuestPhysAddr, GuestPhysMemory};

register_bitfields![u32,
    // vector 0
    pub InterceptCrRw [
        READ_CR0   0,  READ_CR3   3,  READ_CR4   4,  READ_CR8   8,
        WRITE_CR0 16,  WRITE_CR3 19,  WRITE_CR4 20,  WRITE_CR8 24,
    ],

    // vector 1
    pub InterceptDrRw [
        READ_DR0   0,  READ_DR7   7,
        WRITE_DR0 16,  WRITE_DR7 23,
    ],

    // vector 2
    pub InterceptExceptions [
        DE 0, DB 1, BP 3, OF 4, DF 8, GP 13, PF 14, MC 18,
    ],

    /// Vector 3  (offset 0x000C)
    pub InterceptVec3 [
        INTR            0,  NMI             1,  SMI              2,  INIT            3,
        VINTR           4,  CR0_SEL_WRITE   5,  IDTR_READ        6,  GDTR_READ       7,
        LDTR_READ       8,  TR_READ         9,  IDTR_WRITE      10,  GDTR_WRITE     11,
        LDTR_WRITE     12,  TR_WRITE       13,  RDTSC           14,  RDPMC          15,
        PUSHF          16,  POPF           17,  CPUID           18,  RSM            19,
        IRET           20,  SWINT          21,  INVD            22,  PAUSE          23,
        HLT            24,  INVLPG         25,  INVLPGA         26,  IOIO_PROT      27,
        MSR_PROT       28,  TASK_SWITCH    29,  FERR_FREEZE     30,  SHUTDOWN       31,
    ],

    /// Vector 4  (offset 0x0010)
    pub InterceptVec4 [
        VMRUN           0,  VMMCALL         1,  VMLOAD          2,  VMSAVE          3,
        STGI            4,  CLGI            5,  SKINIT          6,  RDTSCP          7,
        ICEBP           8,  WBINVD          9,  MONITOR        10,  MWAIT          11,
        MWAIT_CONDITIONAL 12, XSETBV       13,  RDPRU          14,  EFER_WRITE_TRAP 15,
    ],

    /// Vector 5  (offset 0x0014)
    pub InterceptVec5 [
        INVLPGB         0,  INVLPGB_ILLEGAL 1,  INVPCID         2,
        MCOMMIT         3,  TLBSYNC         4,
    ],
    // VMCB Clean-Bits 15.15.3
    pub VmcbCleanBits [
        INTERCEPTS  0,
        IOPM        1,
        ASID        2,
        TPR         3,
        NP          4,
        CRx         5,
        DRx         6,
        DT          7,
        SEG         8,
        CR2         9,
        LBR         10,
        AVIC        11,
        CET         12,
    ],
];

register_bitfields![u64,
    pub NestedCtl [
        NP_ENABLE        0,
        SEV_ENABLE       1,
        SEV_ES_ENABLE    2,
        GMET_ENABLE      3,   // Guest-Mode-Exec-Trap
        SSCheckEn        4,
        VTE_ENABLE       5,   // Virtual Transparent Encryption
        RO_GPT_EN        6,   // Read-Only Guest Page Tables
        INVLPGB_TLBSYNC  7,
    ],
];

register_bitfields![u8,
    pub VmcbTlbControl [
        CONTROL OFFSET(0) NUMBITS(3) [
            DoNothing                = 0,
            FlushAllOnVmrun          = 1,
            FlushGuestTlb            = 3,
            FlushGuestNonGlobalTlb   = 7,
        ]
    ]
];

register_structs![
    /// Control area of a VMCB (offset 0x000 - 0x3FF).
    pub VmcbControlArea {
        (0x0000 => pub intercept_cr:         ReadWrite<u32, InterceptCrRw::Register>),
        (0x0004 => pub intercept_dr:         ReadWrite<u32, InterceptDrRw::Register>),

        (0x0008 => pub intercept_exceptions: ReadWrite<u32, InterceptExceptions::Register>),
        (0x000C => pub intercept_vector3:    ReadWrite<u32, InterceptVec3::Register>),
        (0x0010 => pub intercept_vector4:    ReadWrite<u32, InterceptVec4::Register>),
        (0x0014 => pub intercept_vector5:    ReadWrite<u32, InterceptVec5::Register>),
        (0x0018 => _reserved_0018),
        (0x003C => pub pause_filter_thresh:   ReadWrite<u16>),
        (0x003E => pub pause_filter_count:    ReadWrite<u16>),

        (0x0040 => pub iopm_base_pa:          ReadWrite<u64>),
        (0x0048 => pub msrpm_base_pa:         ReadWrite<u64>),
        (0x0050 => pub tsc_offset:            ReadWrite<u64>),

        (0x0058 => pub guest_asid:            ReadWrite<u32>),
        (0x005C => pub tlb_control:           ReadWrite<u8, VmcbTlbControl::Register>),
        (0x005D => _reserved_005D),

        (0x0060 => pub int_control:           ReadWrite<u32>),
        (0x0064 => pub int_vector:            ReadWrite<u32>),
        (0x0068 => pub int_state:             ReadWrite<u32>),
        (0x006C => _reserved_006C),

        // ───── VMEXIT  ---------------------------------------------------
        (0x0070 => pub exit_code:             ReadWrite<u64>),
        (0x0078 => pub exit_info_1:           ReadWrite<u64>),
        (0x0080 => pub exit_info_2:           ReadWrite<u64>),
        // 15.7.2
        (0x0088 => pub exit_int_info:         ReadWrite<u32>),
        (0x008C => pub exit_int_info_err:     ReadWrite<u32>),

        // ───── Nested Paging / AVIC -----------------------------------------
        (0x0090 => pub nested_ctl:         ReadWrite<u64, NestedCtl::Register>),
        (0x0098 => pub avic_vapic_bar:     ReadWrite<u64>),
        (0x00A0 => pub ghcb_gpa:           ReadWrite<u64>),

        // ── Event-injection / Nested CR3 / LBR --------------------------------
        (0x00A8 => pub event_inj:          ReadWrite<u32>),
        (0x00AC => pub event_inj_err:      ReadWrite<u32>),
        (0x00B0 => pub nested_cr3:         ReadWrite<u64>),
        (0x00B8 => pub virt_ext:           ReadWrite<u64>),   // LBR-control & V-VMLOAD/VMSAVE

        // ── Clean-bits & Next-RIP --------------------------------------------
        (0x00C0 => pub clean_bits:         ReadWrite<u32, VmcbCleanBits::Register>),
        (0x00C4 => _reserved_00C4),
        (0x00C8 => pub next_rip:           ReadWrite<u64>),

        // ── Decoded-instruction cache ----------------------------------------
        (0x00D0 => pub insn_len:           ReadWrite<u8>),
        (0x00D1 => pub insn_bytes:         [ReadWrite<u8>; 15]),

        // ── AVIC extra --------------------------------------------------------
        (0x00E0 => pub avic_backing_page:  ReadWrite<u64>),
        (0x00E8 => _reserved_00E8),

        (0x00F0 => pub avic_logical_id:    ReadWrite<u64>),
        (0x00F8 => pub avic_physical_id:   ReadWrite<u64>),
        (0x0100 => _reserved_0100),

        (0x0108 => pub vmsa_pa:            ReadWrite<u64>),    // SEV-ES guest only
        (0x0110 => _reserved_0110),

        (0x0400 => @END),
    }
];

/// Size of the control area, i.e. the number of bytes fetched on VMRUN.
pub const VMCB_CONTROL_AREA_SIZE: usize = 0x400;

impl VmcbControlArea {
    /// An all-zero control area: nothing intercepted, ASID 0.
    pub fn zeroed() -> Self {
        // SAFETY: every field is a plain integer register or reserved bytes.
        unsafe { core::mem::zeroed() }
    }

    /// Fetches the control area of the VMCB at `vmcb_gpa` from guest memory.
    pub fn read_from<M: GuestPhysMemory + ?Sized>(
        mem: &M,
        vmcb_gpa: GuestPhysAddr,
    ) -> AxResult<Self> {
        let mut ctrl = Self::zeroed();
        mem.read_guest_phys(vmcb_gpa, ctrl.as_bytes_mut())?;
        Ok(ctrl)
    }

    /// The raw bytes of the control area.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `Self` is `repr(C)`, has no padding and is exactly
        // `VMCB_CONTROL_AREA_SIZE` bytes long.
        unsafe {
            core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>())
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `as_bytes`; any byte pattern is a valid `Self`.
        unsafe { core::slice::from_raw_parts_mut(self as *mut Self as *mut u8, size_of::<Self>()) }
    }

    fn intercept_vector(&self, index: usize) -> u32 {
        match index {
            3 => self.intercept_vector3.get(),
            4 => self.intercept_vector4.get(),
            5 => self.intercept_vector5.get(),
            _ => unreachable!("no intercept vector {}", index),
        }
    }

    /// Returns `true` if the guest hypervisor intercepts `intc`.
    pub fn is_intercept_set(&self, intc: SvmIntercept) -> bool {
        self.intercept_vector(intc.vector()).get_bit(intc.bit() as usize)
    }

    /// Marks `intc` as intercepted.
    pub fn set_intercept(&mut self, intc: SvmIntercept) {
        let mut value = self.intercept_vector(intc.vector());
        value.set_bit(intc.bit() as usize, true);
        match intc.vector() {
            3 => self.intercept_vector3.set(value),
            4 => self.intercept_vector4.set(value),
            _ => self.intercept_vector5.set(value),
        }
    }

    /// Returns `true` if the guest hypervisor asks for nested paging.
    pub fn nested_paging(&self) -> bool {
        self.nested_ctl.is_set(NestedCtl::NP_ENABLE)
    }

    /// Requests nested paging with the given nested CR3.
    pub fn enable_nested_paging(&mut self, ncr3: u64) {
        self.nested_ctl.modify(NestedCtl::NP_ENABLE::SET);
        self.nested_cr3.set(ncr3);
    }

    /// The ASID the nested guest runs with.
    pub fn asid(&self) -> u32 {
        self.guest_asid.get()
    }

    /// The TLB flush requested for the next VMRUN.
    pub fn tlb_control(&self) -> u8 {
        self.tlb_control.read(VmcbTlbControl::CONTROL)
    }
}

impl core::fmt::Debug for VmcbControlArea {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmcbControlArea")
            .field("intercept_cr", &format_args!("{:#x}", self.intercept_cr.get()))
            .field("intercept_dr", &format_args!("{:#x}", self.intercept_dr.get()))
            .field("intercept_exceptions", &format_args!("{:#x}", self.intercept_exceptions.get()))
            .field("intercept_vector3", &format_args!("{:#x}", self.intercept_vector3.get()))
            .field("intercept_vector4", &format_args!("{:#x}", self.intercept_vector4.get()))
            .field("intercept_vector5", &format_args!("{:#x}", self.intercept_vector5.get()))
            .field("guest_asid", &self.guest_asid.get())
            .field("tlb_control", &self.tlb_control())
            .field("nested_ctl", &format_args!("{:#x}", self.nested_ctl.get()))
            .field("nested_cr3", &format_args!("{:#x}", self.nested_cr3.get()))
            .finish_non_exhaustive()
    }
}

/// Exit code and exit information of a #VMEXIT delivered to the guest
/// hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvmExitInfo {
    pub exit_code: core::result::Result<SvmExitCode, u64>,
    pub exit_info_1: u64,
    pub exit_info_2: u64,
}

impl SvmExitInfo {
    pub fn new(exit_code: u64, exit_info_1: u64, exit_info_2: u64) -> Self {
        Self {
            exit_code: exit_code.try_into(),
            exit_info_1,
            exit_info_2,
        }
    }

    /// The raw `EXITCODE` value.
    pub fn raw_exit_code(&self) -> u64 {
        match self.exit_code {
            Ok(code) => code as u64,
            Err(raw) => raw,
        }
    }
}
