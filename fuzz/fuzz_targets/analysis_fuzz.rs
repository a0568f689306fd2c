#![no_main]

use libfuzzer_sys::fuzz_target;
use pg_colocation::planner::MergeStrategy;
use pg_colocation::{AnalysisInput, PushdownSettings};

// Decoding and analysis may fail, but must never panic, and both merge
// strategies must reach the same verdict.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(input) = AnalysisInput::from_json(text) else {
        return;
    };

    let restart = input.analyze(&PushdownSettings::default());
    let union_find = input.analyze(&PushdownSettings {
        merge_strategy: MergeStrategy::UnionFind,
        ..PushdownSettings::default()
    });
    match (restart, union_find) {
        (Ok(a), Ok(b)) => assert_eq!(a.safe, b.safe),
        (Err(_), Err(_)) => {}
        (a, b) => panic!("strategies disagree: {a:?} vs {b:?}"),
    }
});
