use std::sync::Arc;

use pretty_assertions::assert_eq;

use retrodis::apivec::ApiTable;
use retrodis::disassembler::Disassembler;
use retrodis::lang::registry::Registry;
use retrodis::lang::Language;

const CPU: &str = "
# Minimal test CPU.
[0xa9] LDA #<1,unsigned>
[0xd0] BNE <1,signed,@.1,1,rel2>
[0x20] JSR <2,unsigned,@.1,2,entry>
[0x4c] JMP <2,unsigned,@.1,2,entry,terminate>
[0x60] RTS<terminate>
[0x02] .data<tempswitch data>
";

const DATA: &str = "
Trivial!
Default-countdown: 1
[0x??] !byte <@.0,1,unsigned>
";

fn registry() -> Registry {
    Registry::in_memory(&[("cpu", CPU), ("data", DATA)])
}

fn cpu(registry: &Registry) -> Arc<Language> {
    registry.lookup("cpu").unwrap()
}

#[test]
fn test_traversal_and_listing() {
    let registry = registry();
    let image = [
        /* LDA */ 0xa9, 0x01, /* JSR */ 0x20, 0x0b, 0x80, /* BNE */ 0xd0, 0xf9,
        /* JMP */ 0x4c, 0xd2, 0xff, /* unreached */ 0xff, /* RTS */ 0x60,
    ];
    let mut disassembler =
        Disassembler::new(&image, 0x8000, &[(0x8000, cpu(&registry))], ApiTable::empty());
    disassembler.run();

    // The JSR target was confirmed as an entry point, the JMP target
    // fell outside the image, the byte after the JMP stayed dark.
    let expected = "  Addr   Code         Instructions
-----------------------------------
; [cpu]
*0x8000  a9 01        LDA #0x01
 0x8002  20 0b 80     JSR 0x800B
 0x8005  d0 f9        BNE -0x07
 0x8007  4c d2 ff     JMP 0xFFD2
*0x800b  60           RTS

External references:
  0xffd2  cpu

Undeciphered bytes:
8008: .. .. ff ..
";
    assert_eq!(disassembler.render(), expected);
    assert!(disassembler.problems().is_empty());
}

#[test]
fn test_temporary_switch_decodes_one_data_byte() {
    let registry = registry();
    let image = [0x02, 0x2a, 0x60];
    let mut disassembler =
        Disassembler::new(&image, 0, &[(0, cpu(&registry))], ApiTable::empty());
    disassembler.run();

    // `data` is trivial, so its activation is not announced; the switch
    // back to `cpu` is.
    let expected = "  Addr   Code         Instructions
-----------------------------------
; [cpu]
*0x0000  02           .data
 0x0001  2a           !byte 0x2A
; [cpu]
 0x0002  60           RTS
";
    assert_eq!(disassembler.render(), expected);
    let decoded: Vec<(usize, Vec<&str>)> = disassembler
        .decoded()
        .iter()
        .map(|(offset, langs)| (*offset, langs.keys().map(String::as_str).collect()))
        .collect();
    assert_eq!(
        decoded,
        vec![(0, vec!["cpu"]), (1, vec!["data"]), (2, vec!["cpu"])]
    );
}

#[test]
fn test_api_vector_terminates_sequence() {
    let registry = registry();
    let api = ApiTable::parse("ffd2 terminate\n", &registry).unwrap();
    let image = [0x20, 0xd2, 0xff, 0xa9, 0x01];
    let mut disassembler = Disassembler::new(&image, 0, &[(0, cpu(&registry))], api);
    disassembler.run();

    // The call hit a terminating vector, so the bytes after it were
    // never treated as code.
    assert_eq!(disassembler.decoded().keys().copied().collect::<Vec<_>>(), vec![0]);
    assert!(disassembler.problems().is_empty());
    assert_eq!(
        disassembler.externals().get(&0xffd2).unwrap().iter().collect::<Vec<_>>(),
        vec!["cpu"]
    );
    assert_eq!(
        disassembler.deciphered().to_vec(),
        vec![true, true, true, false, false]
    );
}

#[test]
fn test_api_vector_switches_language() {
    let registry = registry();
    let api = ApiTable::parse("ff00 switch-temporarily data\n", &registry).unwrap();
    let image = [0x20, 0x00, 0xff, 0x2a, 0x60];
    let mut disassembler = Disassembler::new(&image, 0, &[(0, cpu(&registry))], api);
    disassembler.run();

    let langs: Vec<&str> = disassembler
        .decoded()
        .values()
        .flat_map(|langs| langs.keys().map(String::as_str))
        .collect();
    assert_eq!(langs, vec!["cpu", "data", "cpu"]);
}

#[test]
fn test_unknown_opcode_is_recorded_not_fatal() {
    let registry = registry();
    let image = [0xa9, 0x01, 0xff];
    let mut disassembler =
        Disassembler::new(&image, 0, &[(0, cpu(&registry))], ApiTable::empty());
    disassembler.run();

    assert_eq!(disassembler.decoded().keys().copied().collect::<Vec<_>>(), vec![0]);
    let problems = disassembler.problems().get(&2).unwrap();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("cpu"));
    assert!(disassembler.render().contains("; ! "));
}

#[test]
fn test_entry_past_image_end_goes_to_ledger() {
    let registry = registry();
    let image = [0x60];
    let mut disassembler = Disassembler::new(
        &image,
        0x8000,
        &[(0x8001, cpu(&registry))],
        ApiTable::empty(),
    );
    disassembler.run();

    assert!(disassembler.decoded().is_empty());
    assert!(disassembler.entry_points().is_empty());
    assert!(disassembler.externals().contains_key(&0x8001));
}

#[test]
fn test_multiple_interpretations_are_kept() {
    let registry = registry();
    let pfloat = registry.lookup("pfloat").unwrap();
    let data = registry.lookup("data").unwrap();
    let image = [0x81, 0x00, 0x00, 0x00, 0x00];
    let mut disassembler =
        Disassembler::new(&image, 0, &[(0, data), (0, pfloat)], ApiTable::empty());
    disassembler.run();

    let at_zero: Vec<&str> = disassembler.decoded()[&0].keys().map(String::as_str).collect();
    assert_eq!(at_zero, vec!["data", "pfloat"]);
    let listing = disassembler.render();
    assert!(listing.contains("!byte 0x81"));
    assert!(listing.contains("!float 1"));
}

#[test]
fn test_rerun_is_deterministic() {
    let first_registry = registry();
    let image = [0xa9, 0x01, 0x20, 0x07, 0x00, 0xff, 0xff, 0x60];
    let render = |registry: &Registry| {
        let mut disassembler =
            Disassembler::new(&image, 0, &[(0, cpu(registry))], ApiTable::empty());
        disassembler.run();
        disassembler.render()
    };
    assert_eq!(render(&first_registry), render(&first_registry));
    // A fresh registry compiles fresh language instances; the result
    // must not depend on instance identity.
    assert_eq!(render(&first_registry), render(&registry()));
}
