//! Mach-O backend through the engine façade.

mod common;

use common::{engine_for, macho, MemorySource};
use symscope_core::{DebugKind, QueryFlags, SymError};

const MODULE: &str = "/usr/lib/libdemo.dylib";

fn load() -> (std::sync::Arc<MemorySource>, symscope_core::Engine)
{
    let source = MemorySource::new();
    source.add(MODULE, macho(&[("_Z3foov", 0x10), ("plain_c", 0x30), ("last", 0x50)]));
    let engine = engine_for(&source);
    (source, engine)
}

#[test]
fn test_underscore_is_stripped()
{
    let (_source, engine) = load();
    assert_eq!(engine.lookup_name(MODULE, "plain_c").unwrap(), 0x30);
    assert_eq!(engine.lookup_name(MODULE, "foo").unwrap(), 0x10);
    assert!(matches!(engine.lookup_name(MODULE, "_plain_c"), Err(SymError::SymbolNotFound)));
}

#[test]
fn test_end_is_next_symbol()
{
    let (_source, engine) = load();

    let info = engine.lookup_address(MODULE, 0x38, QueryFlags::DEMANGLE).unwrap();
    assert_eq!(info.name, "plain_c");
    assert_eq!(info.start_offs, 0x30);
    assert_eq!(info.end_offs, 0x50);

    let first = engine.lookup_address(MODULE, 0x10, QueryFlags::DEMANGLE).unwrap();
    assert_eq!(first.name, "foo");
    assert_eq!(first.end_offs, 0x30);
}

#[test]
fn test_last_symbol_is_a_point()
{
    let (_source, engine) = load();

    let info = engine.lookup_address(MODULE, 0x50, QueryFlags::empty()).unwrap();
    assert_eq!(info.name, "last");
    assert_eq!(info.end_offs, 0x51);
    assert!(info.is_point_symbol());
}

#[test]
fn test_before_first_symbol()
{
    let (_source, engine) = load();
    let err = engine.lookup_address(MODULE, 0x4, QueryFlags::empty()).unwrap_err();
    assert!(matches!(err, SymError::SymbolNotFound));
}

#[test]
fn test_enumeration_is_address_ordered()
{
    let (_source, engine) = load();

    let mut offsets = Vec::new();
    engine
        .enumerate_symbols(MODULE, QueryFlags::empty(), |_, offs| {
            offsets.push(offs);
            true
        })
        .unwrap();
    assert_eq!(offsets, vec![0x10, 0x30, 0x50]);
}

#[test]
fn test_module_kind()
{
    let (_source, engine) = load();

    let kind = engine.get_module_debug_kind(MODULE).unwrap();
    assert!(kind.contains(DebugKind::SYMBOLS | DebugKind::MACHO_SYMTAB));
    assert!(!kind.contains(DebugKind::DWARF_LINE));
    assert_eq!(engine.module_info(MODULE).unwrap().format, "Mach-O");
}
