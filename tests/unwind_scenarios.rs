//! End-to-end unwinding scenarios over synthetic module images.
//!
//! Each test builds a complete byte-level `.eh_frame` (and where needed, a whole ELF
//! image) and drives the public API from section scan to frame recovery, the way an
//! embedding debugger would.

use std::collections::HashMap;

use cfiscope::{
    memory::SliceSource,
    prelude::*,
    unwind::Unwinder,
    ByteOrder, ElfModule,
};

const NAMES: &[&str] = &[
    "rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip",
];

/// Frame a record body with its 4-byte little-endian length field.
fn record(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&u32::try_from(body.len()).unwrap().to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// CIE: version 1, augmentation "", code alignment 1, data alignment -8,
/// return address register 16.
fn standard_cie() -> Vec<u8> {
    record(&[
        0, 0, 0, 0, // CIE id
        1,    // version
        0,    // augmentation ""
        1,    // code alignment factor
        0x78, // data alignment factor -8
        16,   // return address register
        0, 0, 0, // nop padding
    ])
}

/// FDE with 8-byte absolute pointers back-pointing to a CIE at section offset 0.
fn fde_record(fde_start: usize, pc_begin: u64, pc_range: u64, instr: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&u32::try_from(fde_start + 4).unwrap().to_le_bytes());
    body.extend_from_slice(&pc_begin.to_le_bytes());
    body.extend_from_slice(&pc_range.to_le_bytes());
    body.extend_from_slice(instr);
    record(&body)
}

const TERMINATOR: [u8; 4] = [0, 0, 0, 0];

#[test]
fn recover_frame_through_saved_rbp() {
    // def_cfa(rsp, 16); offset_extended(rbp, 2) -> rbp saved at CFA - 16
    let mut section = standard_cie();
    let fde_start = section.len();
    section.extend_from_slice(&fde_record(
        fde_start,
        0x40_0000,
        0x100,
        &[0x0C, 0x07, 0x10, 0x05, 0x06, 0x02],
    ));
    section.extend_from_slice(&TERMINATOR);

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();

    let table = unwinder.table_for_address(0x40_0042).unwrap().unwrap();

    let mut registers = HashMap::new();
    registers.insert("rsp".to_string(), 0x1000_u64);

    // Saved rbp lives at 0x1010 - 16 = 0x1000
    let mut stack = vec![0_u8; 0x20];
    stack[..8].copy_from_slice(&0x7FFF_AAAA_u64.to_le_bytes());
    let memory = SliceSource::new(0x1000, &stack, ByteOrder::LittleEndian, 8);

    let frame = table.apply(&registers, NAMES, &memory).unwrap();
    assert_eq!(frame.frame_address, 0x1010);
    assert_eq!(frame.registers.get("rbp"), Some(&0x7FFF_AAAA));
}

#[test]
fn textrel_pointer_encoding_fails_the_record() {
    // CIE with augmentation "zR" whose FDE pointer encoding is textrel (0x20).
    // The record must be rejected, not silently misread.
    let mut section = record(&[
        0, 0, 0, 0, // CIE id
        1,    // version
        b'z', b'R', 0, // augmentation "zR"
        1,    // code alignment factor
        0x78, // data alignment factor -8
        16,   // return address register
        1,    // augmentation data length
        0x20, // fde pointer encoding: textrel
        0, 0, // nop padding
    ]);
    section.extend_from_slice(&TERMINATOR);

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();

    assert_eq!(unwinder.call_frame_info().cie_count(), 0);
}

#[test]
fn fde_with_unknown_parent_is_skipped() {
    let mut section = standard_cie();

    // Orphan FDE back-pointing past any known CIE
    let orphan_start = section.len();
    let mut orphan = Vec::new();
    orphan.extend_from_slice(&u32::try_from(orphan_start + 4 + 0x400).unwrap().to_le_bytes());
    orphan.extend_from_slice(&0x50_0000_u64.to_le_bytes());
    orphan.extend_from_slice(&0x10_u64.to_le_bytes());
    section.extend_from_slice(&record(&orphan));

    let fde_start = section.len();
    section.extend_from_slice(&fde_record(fde_start, 0x40_0000, 0x100, &[]));
    section.extend_from_slice(&TERMINATOR);

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();

    let cfi = unwinder.call_frame_info();
    assert_eq!(cfi.fde_count(), 1);
    assert!(cfi.fde_for_address(0x50_0000).is_none());
    assert!(cfi.fde_for_address(0x40_0000).is_some());
}

#[test]
fn zero_length_terminates_cleanly_mid_section() {
    let mut section = standard_cie();
    section.extend_from_slice(&TERMINATOR);
    section.extend_from_slice(&[0xFF; 64]); // must never be scanned

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();

    assert_eq!(unwinder.call_frame_info().cie_count(), 1);
    assert_eq!(unwinder.call_frame_info().fde_count(), 0);
}

#[test]
fn prologue_aware_rules_change_with_target_address() {
    // Typical prologue: push rbp; mov rbp, rsp
    //   def_cfa(rsp, 8)            at +0
    //   advance_loc(1)
    //   def_cfa_offset(16); offset(rbp, 2)   at +1
    //   advance_loc(3)
    //   def_cfa_register(rbp)      at +4
    let instr = [
        0x0C, 0x07, 0x08, // def_cfa(7, 8)
        0x41, // advance_loc(1)
        0x0E, 0x10, // def_cfa_offset(16)
        0x86, 0x02, // offset(6, 2)
        0x43, // advance_loc(3)
        0x0D, 0x06, // def_cfa_register(6)
    ];

    let mut section = standard_cie();
    let fde_start = section.len();
    section.extend_from_slice(&fde_record(fde_start, 0x40_0000, 0x100, &instr));
    section.extend_from_slice(&TERMINATOR);

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();

    let at_entry = unwinder.table_for_address(0x40_0000).unwrap().unwrap();
    assert_eq!(at_entry.rule_state().cfa.unwrap().register, 7);
    assert_eq!(at_entry.rule_state().cfa.unwrap().offset, 8);

    let after_push = unwinder.table_for_address(0x40_0002).unwrap().unwrap();
    assert_eq!(after_push.rule_state().cfa.unwrap().offset, 16);
    assert_eq!(
        after_push.rule_state().register(6),
        Some(RegisterRule::CfaOffset(-16))
    );

    let in_body = unwinder.table_for_address(0x40_0080).unwrap().unwrap();
    assert_eq!(in_body.rule_state().cfa.unwrap().register, 6);
    assert_eq!(in_body.rule_state().cfa.unwrap().offset, 16);
}

#[test]
fn return_address_recovered_from_cie_rule() {
    // CIE installs the conventional rip rule; FDE only defines the CFA.
    let mut cie_body = vec![
        0, 0, 0, 0, // CIE id
        1,    // version
        0,    // augmentation ""
        1,    // code alignment factor
        0x78, // data alignment factor -8
        16,   // return address register
        0x90, 0x01, // offset(16, 1) -> rip at CFA - 8
        0,    // nop padding
    ];
    while (cie_body.len() + 4) % 8 != 0 {
        cie_body.push(0);
    }
    let mut section = record(&cie_body);

    let fde_start = section.len();
    section.extend_from_slice(&fde_record(fde_start, 0x40_0000, 0x100, &[0x0C, 0x07, 0x08]));
    section.extend_from_slice(&TERMINATOR);

    let source = SliceSource::new(0, &section, ByteOrder::LittleEndian, 8);
    let unwinder = Unwinder::from_eh_frame(&source, 0).unwrap();
    let table = unwinder.table_for_address(0x40_0010).unwrap().unwrap();

    let mut registers = HashMap::new();
    registers.insert("rsp".to_string(), 0x2000_u64);

    // CFA = 0x2008, return address saved at 0x2000
    let mut stack = vec![0_u8; 0x10];
    stack[..8].copy_from_slice(&0x40_1234_u64.to_le_bytes());
    let memory = SliceSource::new(0x2000, &stack, ByteOrder::LittleEndian, 8);

    let frame = table.apply(&registers, NAMES, &memory).unwrap();
    assert_eq!(frame.return_address, 0x40_1234);
    assert_eq!(frame.frame_address, 0x2008);
}

/// Build a 64-bit little-endian ELF whose `PT_GNU_EH_FRAME` segment points at an
/// `.eh_frame_hdr` structure followed directly by the `.eh_frame` section.
fn module_image(eh_frame: &[u8]) -> Vec<u8> {
    const EHDR_LEN: usize = 64;
    const PHDR_LEN: usize = 56;
    let hdr_offset = (EHDR_LEN + PHDR_LEN) as u64;

    let mut elf = Vec::new();
    elf.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    elf.extend_from_slice(&[0; 8]);
    elf.extend_from_slice(&2_u16.to_le_bytes()); // e_type ET_EXEC
    elf.extend_from_slice(&0x3E_u16.to_le_bytes()); // e_machine x86-64
    elf.extend_from_slice(&1_u32.to_le_bytes()); // e_version
    elf.extend_from_slice(&0_u64.to_le_bytes()); // e_entry
    elf.extend_from_slice(&(EHDR_LEN as u64).to_le_bytes()); // e_phoff
    elf.extend_from_slice(&0_u64.to_le_bytes()); // e_shoff
    elf.extend_from_slice(&0_u32.to_le_bytes()); // e_flags
    elf.extend_from_slice(&(EHDR_LEN as u16).to_le_bytes()); // e_ehsize
    elf.extend_from_slice(&(PHDR_LEN as u16).to_le_bytes()); // e_phentsize
    elf.extend_from_slice(&1_u16.to_le_bytes()); // e_phnum
    elf.extend_from_slice(&0_u16.to_le_bytes()); // e_shentsize
    elf.extend_from_slice(&0_u16.to_le_bytes()); // e_shnum
    elf.extend_from_slice(&0_u16.to_le_bytes()); // e_shstrndx

    // PT_GNU_EH_FRAME program header
    elf.extend_from_slice(&0x6474_E550_u32.to_le_bytes()); // p_type
    elf.extend_from_slice(&4_u32.to_le_bytes()); // p_flags PF_R
    elf.extend_from_slice(&hdr_offset.to_le_bytes()); // p_offset
    elf.extend_from_slice(&hdr_offset.to_le_bytes()); // p_vaddr
    elf.extend_from_slice(&hdr_offset.to_le_bytes()); // p_paddr
    elf.extend_from_slice(&8_u64.to_le_bytes()); // p_filesz
    elf.extend_from_slice(&8_u64.to_le_bytes()); // p_memsz
    elf.extend_from_slice(&4_u64.to_le_bytes()); // p_align

    // .eh_frame_hdr: version 1, pcrel|sdata4 pointer to .eh_frame 4 bytes further on
    assert_eq!(elf.len() as u64, hdr_offset);
    elf.extend_from_slice(&[1, 0x1B, 0x03, 0x3B]);
    elf.extend_from_slice(&4_i32.to_le_bytes());

    elf.extend_from_slice(eh_frame);
    elf
}

#[test]
fn unwind_through_elf_module() {
    let mut section = standard_cie();
    let fde_start = section.len();
    section.extend_from_slice(&fde_record(
        fde_start,
        0x40_0000,
        0x100,
        &[0x0C, 0x07, 0x10, 0x05, 0x06, 0x02],
    ));
    section.extend_from_slice(&TERMINATOR);

    let module = ElfModule::from_mem(module_image(&section)).unwrap();
    let unwinder = module.unwinder().unwrap();

    assert_eq!(unwinder.call_frame_info().cie_count(), 1);
    assert_eq!(unwinder.call_frame_info().fde_count(), 1);

    let table = unwinder.table_for_address(0x40_0042).unwrap().unwrap();

    let mut registers = HashMap::new();
    registers.insert("rsp".to_string(), 0x1000_u64);

    let mut stack = vec![0_u8; 0x20];
    stack[..8].copy_from_slice(&0xCAFE_u64.to_le_bytes());
    let memory = SliceSource::new(0x1000, &stack, ByteOrder::LittleEndian, 8);

    let frame = table.apply(&registers, NAMES, &memory).unwrap();
    assert_eq!(frame.frame_address, 0x1010);
    assert_eq!(frame.registers.get("rbp"), Some(&0xCAFE));

    // Addresses outside the covered range stay unresolved
    assert!(unwinder.table_for_address(0x50_0000).unwrap().is_none());
}
