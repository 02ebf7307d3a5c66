mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use miette::NamedSource;
use rstest::rstest;
use serde::Deserialize;

use selsan::ir::{Func, InstId, InstTag, Module, Value};
use selsan::pass::{self, Mode, PassOptions, Selection};
use selsan::pta::{Analysis, PointsToOracle, Strategy};
use selsan::stats::Statistics;

use self::common::Matchers;

const ALL_STRATEGIES: [Strategy; 3] = [
    Strategy::Andersen,
    Strategy::Steensgaard,
    Strategy::DemandDriven,
];

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
struct PassTest {
    /// The points-to strategies to run with; all of them if empty.
    #[serde(default)]
    strategies: Vec<String>,

    #[serde(default)]
    mode: Option<String>,

    #[serde(default)]
    fail: bool,

    #[serde(default)]
    fail_message: Matchers,

    /// Expected instruction tags, keyed by `func/%name`, or by `func/#n` for
    /// the `n`-th instruction of a function.
    #[serde(default)]
    tags: BTreeMap<String, String>,

    /// The exact set of functions marked for instrumentation.
    #[serde(default)]
    instrumented: Option<Vec<String>>,

    #[serde(default)]
    unsafe_objects: Option<Vec<String>>,

    #[serde(default)]
    false_safe: Option<Vec<String>>,

    #[serde(default)]
    unsafe_closures: Option<Vec<String>>,

    /// How many instructions the final sweep visits.
    #[serde(default)]
    swept: Option<usize>,

    /// How many of the swept instructions end up instrumented.
    #[serde(default)]
    instrumented_count: Option<usize>,
}

impl PassTest {
    fn strategies(&self) -> Vec<Strategy> {
        if self.strategies.is_empty() {
            return ALL_STRATEGIES.to_vec();
        }

        self.strategies
            .iter()
            .map(|name| {
                name.parse::<Strategy>()
                    .unwrap_or_else(|_| panic!("unknown strategy `{name}`"))
            })
            .collect()
    }

    fn mode(&self) -> Mode {
        match &self.mode {
            Some(name) => name
                .parse()
                .unwrap_or_else(|_| panic!("unknown mode `{name}`")),
            None => Mode::Selective,
        }
    }
}

fn find_value(module: &Module, path: &str) -> Value {
    module
        .find_value(path)
        .unwrap_or_else(|| panic!("the module has no value `{path}`"))
}

fn find_inst(module: &Module, path: &str) -> InstId {
    if let Some((func_name, idx)) = path.rsplit_once("/#") {
        let func_id = module
            .func_by_name(func_name)
            .unwrap_or_else(|| panic!("the module has no function `{func_name}`"));
        let idx = idx
            .parse::<usize>()
            .unwrap_or_else(|_| panic!("`{path}` has an invalid instruction index"));

        return module
            .func_insts(func_id)
            .nth(idx)
            .unwrap_or_else(|| panic!("`{func_name}` has no instruction #{idx}"));
    }

    match find_value(module, path) {
        Value::Inst(inst_id) => inst_id,
        _ => panic!("`{path}` is not an instruction"),
    }
}

fn sorted_values(module: &Module, paths: &[String]) -> Vec<Value> {
    let mut values = paths
        .iter()
        .map(|path| find_value(module, path))
        .collect::<Vec<_>>();
    values.sort();

    values
}

fn func_names(module: &Module, predicate: impl Fn(&Func) -> bool) -> Vec<String> {
    let mut names = module
        .funcs
        .values()
        .filter(|&func| predicate(func))
        .map(|func| func.name.clone())
        .collect::<Vec<_>>();
    names.sort();

    names
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();

    names
}

fn check_selection(
    module: &Module,
    analysis: &Analysis,
    selection: &Selection,
    stats: &Statistics,
    test: &PassTest,
    strategy: Strategy,
) {
    if let Some(expected) = test.swept {
        assert_eq!(stats.swept, expected, "swept instruction count differs with {strategy}");
    }

    if let Some(expected) = test.instrumented_count {
        assert_eq!(
            stats.instrumented, expected,
            "instrumented instruction count differs with {strategy}"
        );
    }

    if let Some(expected) = &test.unsafe_objects {
        assert_eq!(
            selection.unsafe_objects.values(),
            sorted_values(module, expected),
            "unsafe objects differ with {strategy}"
        );
    }

    if let Some(expected) = &test.false_safe {
        let mut actual = selection
            .false_safe
            .objects()
            .iter()
            .filter_map(|obj| analysis.resolve_object(obj))
            .collect::<Vec<_>>();
        actual.sort();

        assert_eq!(
            actual,
            sorted_values(module, expected),
            "false-safe objects differ with {strategy}"
        );
    }
}

fn check_module(module: &Module, test: &PassTest, strategy: Strategy) {
    for (path, expected) in &test.tags {
        let expected = expected
            .parse::<InstTag>()
            .unwrap_or_else(|_| panic!("unknown tag `{expected}`"));

        let inst_id = find_inst(module, path);

        assert_eq!(
            module.insts[inst_id].tag, expected,
            "wrong tag for `{path}` with {strategy}"
        );
    }

    if let Some(expected) = &test.instrumented {
        assert_eq!(
            func_names(module, Func::requires_instrumentation),
            sorted(expected),
            "instrumented functions differ with {strategy}"
        );
    }

    if let Some(expected) = &test.unsafe_closures {
        assert_eq!(
            func_names(module, Func::is_unsafe_closure),
            sorted(expected),
            "unsafe closures differ with {strategy}"
        );
    }
}

fn run_test(source_path: &Path, source: &str, test: &PassTest, strategy: Strategy) {
    let mut module = match selsan::parse::parse(source) {
        Ok(module) => module,

        Err(e) => panic!(
            "Parsing failed:\n{:?}",
            miette::Report::new(e).with_source_code(NamedSource::new(
                source_path.to_string_lossy(),
                source.to_owned(),
            ))
        ),
    };
    let mut stats = Statistics::new();

    match test.mode() {
        Mode::Selective => {
            let analysis = match Analysis::build(&module, strategy) {
                Ok(_) if test.fail => panic!("Expected the analysis to fail with {strategy}"),
                Ok(analysis) => analysis,
                Err(e) if !test.fail => panic!("The analysis failed (expected success): {e}"),

                Err(e) => {
                    if let Err(matcher_msg) = test.fail_message.check(&e.to_string()) {
                        panic!("The analysis failed with unexpected message: {matcher_msg}. Details:\n{e}");
                    }

                    return;
                }
            };

            let selection = pass::select(&mut module, &analysis, &mut stats);
            check_selection(&module, &analysis, &selection, &stats, test, strategy);
            assert!(stats.instrumented <= stats.swept);
        }

        mode => {
            assert!(!test.fail, "only the selective mode can fail");

            let options = PassOptions { strategy, mode };
            let selection = pass::run(&mut module, &options, &mut stats)
                .expect("a mode without a points-to analysis cannot fail");
            assert!(selection.is_none());
            assert_eq!(stats.pointer_queries, 0);
        }
    }

    check_module(&module, test, strategy);
}

#[rstest]
fn test_pass(#[files("tests/pass/**/*.sir")] source_path: PathBuf) {
    miette::set_panic_hook();

    let source = fs::read_to_string(&source_path).expect("Failed to read the test source");
    let mut test: PassTest = common::parse_comment_header(&source);
    test.fail = test.fail || !test.fail_message.is_empty();

    for strategy in test.strategies() {
        run_test(&source_path, &source, &test, strategy);
    }
}
