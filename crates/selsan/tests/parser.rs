mod common;

use std::fs;
use std::path::PathBuf;

use miette::NamedSource;
use rstest::rstest;
use serde::Deserialize;

use self::common::Matchers;

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
struct ParserTest {
    #[serde(default)]
    fail: bool,

    #[serde(default)]
    fail_message: Matchers,

    /// Whether printing the parsed module and parsing it again yields the same text.
    #[serde(default)]
    reprint: bool,
}

#[rstest]
fn test_parser(#[files("tests/parser/**/*.sir")] source_path: PathBuf) {
    miette::set_panic_hook();

    let source = fs::read_to_string(&source_path).expect("Failed to read the test source");
    let mut test: ParserTest = common::parse_comment_header(&source);
    test.fail = test.fail || !test.fail_message.is_empty();

    let result = match selsan::parse::parse(&source) {
        Ok(module) => Ok(module),

        Err(e) => Err(miette::Report::new(e).with_source_code(NamedSource::new(
            source_path.to_string_lossy(),
            source.clone(),
        ))),
    };

    match result {
        Ok(_) if test.fail => panic!("Expected parsing failure but parsed successfully"),
        Err(e) if !test.fail => panic!("Parsing failed (expected success):\n{e:?}"),

        Ok(module) => {
            if test.reprint {
                let printed = module.to_string();
                let reparsed = match selsan::parse::parse(&printed) {
                    Ok(module) => module,
                    Err(e) => panic!(
                        "Printed module failed to parse:\n{:?}",
                        miette::Report::new(e).with_source_code(printed.clone())
                    ),
                };

                assert_eq!(reparsed.to_string(), printed);
            }
        }

        Err(e) => {
            if !test.fail_message.is_empty() {
                if let Err(matcher_msg) = test.fail_message.check(&e.to_string()) {
                    panic!(
                        "Parsing failed with unexpected message: {matcher_msg}. Details:\n{e:?}"
                    );
                }
            }
        }
    }
}
