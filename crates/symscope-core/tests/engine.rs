//! Engine lifecycle, caching and re-entrancy.

mod common;

use std::sync::Arc;
use std::thread;

use common::{config, engine_for, ElfFixture, MemorySource};
use symscope_core::{Engine, ErrorCode, ImageSource, QueryFlags, SymError};

fn two_modules() -> Arc<MemorySource>
{
    let source = MemorySource::new();
    source.add("/lib/one.so", ElfFixture::new().function("one_a", 0x10, 8).function("one_b", 0x20, 8).build());
    source.add("/lib/two.so", ElfFixture::new().function("two_a", 0x40, 8).build());
    source
}

#[test]
fn test_modules_are_cached()
{
    let source = two_modules();
    let engine = engine_for(&source);

    engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap();
    engine.lookup_name("/lib/one.so", "one_b").unwrap();
    engine.get_module_debug_kind("/lib/one.so").unwrap();
    assert_eq!(source.opens("/lib/one.so"), 1);
    assert_eq!(engine.loaded_modules(), 1);
}

#[test]
fn test_free_resources_forces_reload()
{
    let source = two_modules();
    let engine = engine_for(&source);

    engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap();
    engine.free_resources("/lib/one.so").unwrap();
    assert_eq!(engine.loaded_modules(), 0);
    engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap();
    assert_eq!(source.opens("/lib/one.so"), 2);

    let err = engine.free_resources("/lib/two.so").unwrap_err();
    assert!(matches!(err, SymError::InvalidParameter(_)));
}

#[test]
fn test_free_inside_callback_is_rejected()
{
    let source = two_modules();
    let engine = engine_for(&source);
    engine.lookup_address("/lib/two.so", 0x40, QueryFlags::empty()).unwrap();

    let mut results = Vec::new();
    engine
        .enumerate_symbols("/lib/one.so", QueryFlags::empty(), |_, _| {
            results.push(engine.free_resources("/lib/two.so"));
            results.push(engine.free_resources("/lib/one.so"));
            false
        })
        .unwrap();
    assert!(results.iter().all(|result| matches!(result, Err(SymError::Recursive))));
    assert_eq!(engine.loaded_modules(), 2);

    assert!(matches!(
        engine.search_symbols("/lib/one.so", "*", false, QueryFlags::empty(), |_, _| engine.exit().is_err()),
        Ok(())
    ));
    assert!(engine.is_initialized());

    // Once the enumeration has returned the module can go.
    engine.free_resources("/lib/two.so").unwrap();
}

#[test]
fn test_queries_from_inside_callback()
{
    let source = two_modules();
    let engine = engine_for(&source);

    let mut nested = Vec::new();
    engine
        .enumerate_symbols_ex("/lib/one.so", QueryFlags::empty(), |info| {
            let other = engine.lookup_address("/lib/two.so", 0x44, QueryFlags::empty()).unwrap();
            let same = engine.lookup_name("/lib/one.so", &info.name).unwrap();
            nested.push((other.name, same));
            true
        })
        .unwrap();
    assert_eq!(nested, vec![("two_a".to_string(), 0x10), ("two_a".to_string(), 0x20)]);
    assert_eq!(source.opens("/lib/two.so"), 1);
}

#[test]
fn test_sideline_mode_is_not_implemented()
{
    let source = two_modules();
    let engine = Engine::new().with_source(Arc::clone(&source) as Arc<dyn ImageSource>);
    let mut cfg = config();
    cfg.sideline_id = 7;
    engine.init(cfg).unwrap();

    let err = engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotImplemented);
    assert_eq!(source.opens("/lib/one.so"), 0);
    engine.exit().unwrap();
}

#[test]
fn test_case_insensitive_cache_keys()
{
    let source = two_modules();
    let engine = Engine::new().with_source(Arc::clone(&source) as Arc<dyn ImageSource>);
    let mut cfg = config();
    cfg.case_insensitive_paths = true;
    engine.init(cfg).unwrap();

    engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap();
    let info = engine.lookup_address("/LIB/ONE.SO", 0x20, QueryFlags::empty()).unwrap();
    assert_eq!(info.name, "one_b");
    assert_eq!(source.opens("/lib/one.so"), 1);
}

#[test]
fn test_exit_drops_modules()
{
    let source = two_modules();
    let engine = engine_for(&source);
    engine.init(config()).unwrap();

    engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap();
    engine.exit().unwrap();
    assert_eq!(engine.loaded_modules(), 1);
    engine.exit().unwrap();
    assert_eq!(engine.loaded_modules(), 0);

    let err = engine.lookup_address("/lib/one.so", 0x10, QueryFlags::empty()).unwrap_err();
    assert!(matches!(err, SymError::InvalidParameter(_)));
    assert!(engine.exit().is_err());
}

#[test]
fn test_concurrent_lookups()
{
    let source = two_modules();
    let engine = engine_for(&source);

    thread::scope(|scope| {
        for worker in 0..8u64 {
            let engine = &engine;
            scope.spawn(move || {
                for round in 0..50u64 {
                    let (path, offs, name) = if (worker + round) % 2 == 0 {
                        ("/lib/one.so", 0x20, "one_b")
                    } else {
                        ("/lib/two.so", 0x40, "two_a")
                    };
                    let info = engine.lookup_address(path, offs, QueryFlags::empty()).unwrap();
                    assert_eq!(info.name, name);
                }
            });
        }
    });
    assert_eq!(source.opens("/lib/one.so"), 1);
    assert_eq!(source.opens("/lib/two.so"), 1);
}

#[test]
fn test_demangle_without_init()
{
    let mut buf = [0u8; 64];
    let needed = Engine::demangle_symbol(&mut buf, "_ZN3Foo3BarEv", QueryFlags::DEMANGLE);
    assert_eq!(needed, "Foo::Bar".len() + 1);
    assert_eq!(&buf[..needed - 1], b"Foo::Bar");
}
