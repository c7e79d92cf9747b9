//! Unit tests for the A64 interpreter.
//!
//! Most tests assemble a short routine, run it on a bare [`TestMachine`] and
//! inspect the register file afterwards. A few drive [`Interpreter::step`]
//! directly to check the reported [`StepResult`].

use crate::{
    assembly::{d, q, s, w, x, Assembler, Cond, LR, SP, XZR},
    emulation::{
        engine::{
            cpu::{sysreg, Cpu},
            decoder::decode,
            error::{AccessKind, Fault, FaultKind, MemoryFault},
            result::{RunOutcome, StepResult},
        },
        AddressSpace,
    },
    test::{TestMachine, CODE_BASE, DATA_BASE},
};

use super::*;

fn step_word(word: u32, cpu: &mut Cpu) -> StepResult {
    let mut memory = AddressSpace::new();
    let instruction = decode(word).unwrap();
    Interpreter::new().step(cpu, &mut memory, &instruction).unwrap()
}

fn assemble_one(build: impl FnOnce(&mut Assembler) -> crate::Result<()>) -> u32 {
    let mut asm = Assembler::new(CODE_BASE);
    build(&mut asm).unwrap();
    let bytes = asm.assemble().unwrap();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[test]
fn test_step_reports_control_flow() {
    let mut cpu = Cpu::new();
    cpu.pc = CODE_BASE;

    let word = assemble_one(|a| a.bl_to(CODE_BASE + 0x40).map(drop));
    assert_eq!(
        step_word(word, &mut cpu),
        StepResult::Call {
            target: CODE_BASE + 0x40,
            return_address: CODE_BASE + 4,
        }
    );
    assert_eq!(cpu.lr(), CODE_BASE + 4);

    let word = assemble_one(|a| a.ret().map(drop));
    assert_eq!(
        step_word(word, &mut cpu),
        StepResult::Return {
            target: CODE_BASE + 4
        }
    );

    let word = assemble_one(|a| a.svc(0x12).map(drop));
    assert_eq!(step_word(word, &mut cpu), StepResult::Trap { number: 0x12 });

    let word = assemble_one(|a| a.add_imm(x(0), x(0), 1).map(drop));
    assert_eq!(step_word(word, &mut cpu), StepResult::Continue);
    assert_eq!(cpu.x(0), 1);
}

#[test]
fn test_zero_register_discards_writes() {
    let mut cpu = Cpu::new();
    let word = assemble_one(|a| a.movz(XZR, 0x1234, 0).map(drop));
    step_word(word, &mut cpu);
    assert_eq!(cpu.x(31), 0);
}

#[test]
fn test_flags_and_conditions() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 5)?
            .subs_imm(x(1), x(0), 5)?
            .cset(x(2), Cond::Eq)?
            .mov_imm(w(3), 0x7FFF_FFFF)?
            .adds_imm(w(4), w(3), 1)?
            .cset(x(5), Cond::Vs)?
            .mov_imm(x(6), 3)?
            .subs_imm(x(7), x(6), 5)?
            .cset(x(8), Cond::Lt)?
            .cset(x(9), Cond::Lo)?
            .cset(x(10), Cond::Gt)?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(1), 0);
    assert_eq!(cpu.x(2), 1);
    assert_eq!(cpu.x(4), 0x8000_0000);
    assert_eq!(cpu.x(5), 1);
    assert_eq!(cpu.x(7), (-2i64) as u64);
    assert_eq!(cpu.x(8), 1);
    assert_eq!(cpu.x(9), 1);
    assert_eq!(cpu.x(10), 0);
}

#[test]
fn test_shifts_and_bitfields() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 0x8000_0000_0000_0000)?
            .asr(x(1), x(0), 4)?
            .lsr(x(2), x(0), 4)?
            .mov_imm(w(3), 0xFF)?
            .lsl(w(4), w(3), 28)?
            .ubfx(x(5), x(0), 60, 4)?
            .sxtw(x(6), w(4))?
            .mov_imm(x(7), 1)?
            .mov_imm(x(8), 65)?
            .lslv(x(9), x(7), x(8))?
            .clz(x(10), x(7))?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(1), 0xF800_0000_0000_0000);
    assert_eq!(cpu.x(2), 0x0800_0000_0000_0000);
    assert_eq!(cpu.x(4), 0xF000_0000);
    assert_eq!(cpu.x(5), 8);
    assert_eq!(cpu.x(6), 0xFFFF_FFFF_F000_0000);
    // Variable shifts use the amount modulo the register width
    assert_eq!(cpu.x(9), 2);
    assert_eq!(cpu.x(10), 63);
}

#[test]
fn test_multiply_and_divide() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 100)?
            .udiv(x(1), x(0), XZR)?
            .mov_imm(x(2), 7)?
            .udiv(x(3), x(0), x(2))?
            .msub(x(4), x(3), x(2), x(0))?
            .mov_imm(x(5), 0x8000_0000_0000_0000)?
            .movn(x(6), 0, 0)?
            .sdiv(x(7), x(5), x(6))?
            .umulh(x(8), x(6), x(6))?
            .mul(x(9), x(2), x(2))?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(1), 0);
    assert_eq!(cpu.x(3), 14);
    assert_eq!(cpu.x(4), 2);
    assert_eq!(cpu.x(6), u64::MAX);
    assert_eq!(cpu.x(7), i64::MIN as u64);
    assert_eq!(cpu.x(8), 0xFFFF_FFFF_FFFF_FFFE);
    assert_eq!(cpu.x(9), 49);
}

#[test]
fn test_counting_loop() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 0)?.mov_imm(x(1), 10)?;
        a.label("loop")?;
        a.add(x(0), x(0), x(1))?
            .subs_imm(x(1), x(1), 1)?
            .b_cond(Cond::Ne, "loop")?
            .ret()?;
        Ok(())
    });
    assert_eq!(machine.returned(), 55);
    // 2 setup + 10 * 3 loop + ret
    assert_eq!(machine.controller.stats().instructions_executed, 33);
}

#[test]
fn test_nested_call() {
    let mut machine = TestMachine::new(|a| {
        a.prologue()?
            .mov_imm(x(0), 20)?
            .bl("double")?
            .add_imm(x(0), x(0), 2)?
            .epilogue()?;
        a.label("double")?;
        a.add(x(0), x(0), x(0))?.ret()?;
        Ok(())
    });
    assert_eq!(machine.run(), RunOutcome::Returned(42));
    assert_eq!(machine.controller.stats().max_call_depth, 1);
    assert_eq!(machine.controller.call_depth(), 0);
    assert_eq!(machine.cpu.lr(), 0);
}

#[test]
fn test_compare_and_branch() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 0)?.mov_imm(x(1), 0b100)?;
        a.cbz(x(1), "skip")?.add_imm(x(0), x(0), 1)?;
        a.label("skip")?;
        a.tbz(x(1), 2, "bit_clear")?.add_imm(x(0), x(0), 10)?;
        a.label("bit_clear")?;
        a.tbnz(x(1), 0, "done")?.add_imm(x(0), x(0), 100)?;
        a.label("done")?;
        a.ret()?;
        Ok(())
    });
    assert_eq!(machine.returned(), 111);
}

#[test]
fn test_loads_and_stores() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), DATA_BASE)?
            .mov_imm(x(1), 0x1122_3344_5566_7788)?
            .str(x(1), x(0), 0)?
            .ldrb(w(2), x(0), 0)?
            .ldrsb(x(3), x(0), 0)?
            .ldrh(w(4), x(0), 2)?
            .ldr(w(5), x(0), 4)?
            .mov_imm(x(6), 0xAAAA)?
            .mov_imm(x(7), 0xBBBB)?
            .stp(x(6), x(7), x(0), 16)?
            .ldp(x(8), x(9), x(0), 16)?
            .add_imm(x(10), x(0), 0x40)?
            .str_pre(x(1), x(10), 8)?
            .mov(x(11), x(10))?
            .ldr_post(x(12), x(11), 16)?
            .mov_imm(x(13), 2)?
            .ldr_reg(x(14), x(0), x(13), true)?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(2), 0x88);
    assert_eq!(cpu.x(3), 0xFFFF_FFFF_FFFF_FF88);
    assert_eq!(cpu.x(4), 0x5566);
    assert_eq!(cpu.x(5), 0x1122_3344);
    assert_eq!((cpu.x(8), cpu.x(9)), (0xAAAA, 0xBBBB));
    assert_eq!(cpu.x(10), DATA_BASE + 0x48);
    assert_eq!(cpu.x(11), DATA_BASE + 0x58);
    assert_eq!(cpu.x(12), 0x1122_3344_5566_7788);
    // [x0 + 2 * 8] is the first word of the stored pair
    assert_eq!(cpu.x(14), 0xAAAA);
    assert_eq!(
        machine.memory.read_u64(DATA_BASE + 0x48).unwrap(),
        0x1122_3344_5566_7788
    );
}

#[test]
fn test_stack_frame() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 7)?
            .stp_pre(x(0), LR, SP, -16)?
            .mov_imm(x(0), 0)?
            .ldp_post(x(0), LR, SP, 16)?
            .ret()?;
        Ok(())
    });
    assert_eq!(machine.returned(), 7);
    assert_eq!(
        machine.cpu.sp,
        crate::test::STACK_BASE + crate::test::STACK_SIZE as u64
    );
}

#[test]
fn test_atomics_and_exclusives() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), DATA_BASE)?
            .mov_imm(x(1), 5)?
            .str(x(1), x(0), 0)?
            .mov_imm(x(2), 3)?
            .ldadd(x(2), x(3), x(0))?
            .ldxr(x(4), x(0))?
            .add_imm(x(4), x(4), 1)?
            .stxr(w(5), x(4), x(0))?
            .mov_imm(x(6), 9)?
            .mov_imm(x(7), 100)?
            .cas(x(6), x(7), x(0))?
            .mov_imm(x(8), 1)?
            .mov_imm(x(9), 200)?
            .cas(x(8), x(9), x(0))?
            .mov_imm(x(10), 7)?
            .swp(x(10), x(11), x(0))?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(3), 5);
    assert_eq!(cpu.x(4), 9);
    assert_eq!(cpu.x(5), 0);
    assert_eq!(cpu.x(6), 9);
    assert_eq!(cpu.x(8), 100);
    assert_eq!(cpu.x(11), 100);
    assert_eq!(machine.memory.read_u64(DATA_BASE).unwrap(), 7);
}

#[test]
fn test_floating_point() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 3)?
            .scvtf(d(0), x(0))?
            .mov_imm(x(1), 4)?
            .scvtf(d(1), x(1))?
            .fdiv(d(2), d(0), d(1))?
            .fmov_to_gpr(x(2), d(2))?
            .fmul(d(3), d(2), d(1))?
            .fcvtzs(x(3), d(3))?
            .fcmp(d(0), d(1))?
            .cset(x(4), Cond::Lt)?
            .fcvt(s(4), d(2))?
            .fmov_to_gpr(w(5), s(4))?
            .fadd(s(5), s(4), s(4))?
            .fmov_to_gpr(w(6), s(5))?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.d(2), 0.75);
    assert_eq!(cpu.x(2), 0.75f64.to_bits());
    assert_eq!(cpu.x(3), 3);
    assert_eq!(cpu.x(4), 1);
    assert_eq!(cpu.x(5), u64::from(0.75f32.to_bits()));
    assert_eq!(cpu.x(6), u64::from(1.5f32.to_bits()));
}

#[test]
fn test_simd_structures() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(1), DATA_BASE)?
            .ld1(q(0), 2, x(1), true)?
            .eor_16b(q(2), q(0), q(1))?
            .umov_d(x(2), q(2), 0)?
            .mov_imm(x(3), DATA_BASE + 0x100)?
            .st1(q(0), 2, x(3), false)?
            .mov_imm(w(4), 0xAB)?
            .dup_16b(q(3), w(4))?
            .umov_d(x(5), q(3), 1)?
            .movi_zero(q(4))?
            .add_4s(q(5), q(3), q(4))?
            .umov_d(x(6), q(5), 0)?
            .ret()?;
        Ok(())
    });
    let pattern: Vec<u8> = (0..32).collect();
    machine.memory.write(DATA_BASE, &pattern).unwrap();
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.x(1), DATA_BASE + 32);
    assert_eq!(cpu.x(2), 0x1010_1010_1010_1010);
    assert_eq!(cpu.x(5), 0xABAB_ABAB_ABAB_ABAB);
    assert_eq!(cpu.x(6), 0xABAB_ABAB_ABAB_ABAB);
    assert_eq!(
        machine.memory.read_bytes(DATA_BASE + 0x100, 32).unwrap(),
        pattern
    );
}

#[test]
fn test_system_registers() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(0), 0x1234)?
            .msr(sysreg::TPIDR_EL0, x(0))?
            .mrs(x(1), sysreg::TPIDR_EL0)?
            .mrs(x(2), sysreg::CNTFRQ_EL0)?
            .mrs(x(3), sysreg::MIDR_EL1)?
            .mrs(x(4), sysreg::DCZID_EL0)?
            .ret()?;
        Ok(())
    });
    machine.returned();

    let cpu = &machine.cpu;
    assert_eq!(cpu.tpidr_el0, 0x1234);
    assert_eq!(cpu.x(1), 0x1234);
    assert_eq!(cpu.x(2), COUNTER_FREQUENCY);
    assert_eq!(cpu.x(3), MIDR_VALUE);
    assert_eq!(cpu.x(4), DCZID_VALUE);
}

#[test]
fn test_unmapped_read_faults() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(1), 0xDEAD_0000)?.ldr(x(0), x(1), 0)?.ret()?;
        Ok(())
    });
    assert_eq!(
        machine.run(),
        RunOutcome::Faulted(Fault::Memory(MemoryFault {
            address: 0xDEAD_0000,
            access: AccessKind::Read,
            kind: FaultKind::Unmapped,
        }))
    );
}

#[test]
fn test_write_to_code_faults() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(1), CODE_BASE)?.str(x(0), x(1), 0)?.ret()?;
        Ok(())
    });
    assert_eq!(
        machine.run(),
        RunOutcome::Faulted(Fault::Memory(MemoryFault::protection(
            CODE_BASE,
            AccessKind::Write
        )))
    );
}

#[test]
fn test_execute_from_data_faults() {
    let mut machine = TestMachine::new(|a| {
        a.mov_imm(x(1), DATA_BASE)?.br(x(1))?;
        Ok(())
    });
    match machine.run() {
        RunOutcome::Faulted(Fault::Memory(fault)) => {
            assert_eq!(fault.address, DATA_BASE);
            assert_eq!(fault.access, AccessKind::Execute);
        }
        other => panic!("unexpected outcome: {other}"),
    }
}

#[test]
fn test_breakpoint_and_undefined() {
    let mut machine = TestMachine::new(|a| {
        a.brk(7)?;
        Ok(())
    });
    assert_eq!(
        machine.run(),
        RunOutcome::Faulted(Fault::Breakpoint {
            address: CODE_BASE,
            imm: 7
        })
    );

    let mut machine = TestMachine::new(|a| {
        a.emit(0);
        Ok(())
    });
    assert_eq!(
        machine.run(),
        RunOutcome::Faulted(Fault::UndefinedInstruction {
            address: CODE_BASE,
            word: 0
        })
    );
}
