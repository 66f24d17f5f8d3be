// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use rstest::rstest;

use super::translate_str;
use crate::state::Mapping;

fn mapping() -> Mapping {
    Mapping {
        host_root: "D:/GitHub/ccbox".to_string(),
        container_root: "/d/GitHub/ccbox".to_string(),
    }
}

#[rstest]
#[case("D:/GitHub/ccbox/src/main.go", Some("/d/GitHub/ccbox/src/main.go"))]
#[case("D:\\GitHub\\ccbox\\src\\main.go", Some("/d/GitHub/ccbox/src/main.go"))]
#[case("d:/github/CCBOX/x", Some("/d/GitHub/ccbox/x"))]
#[case("D:/GitHub/ccbox", Some("/d/GitHub/ccbox"))]
fn test_translate_matching_paths(#[case] input: &str, #[case] expected: Option<&str>) {
    let result = translate_str(&mapping(), input);
    assert_eq!(result.as_deref(), expected);
}

#[rstest]
#[case("/etc/passwd")]
#[case("relative/path")]
#[case("D:/GitHub/ccbox-web/index.html")]
#[case("D:/GitHub")]
fn test_translate_passes_other_paths_through(#[case] input: &str) {
    assert_eq!(translate_str(&mapping(), input), None);
}

#[rstest]
fn test_translate_requires_separator_boundary() {
    // the root as a strict prefix of a longer name must not match
    assert_eq!(translate_str(&mapping(), "D:/GitHub/ccboxy"), None);
    // but a separator right after the root does
    assert_eq!(
        translate_str(&mapping(), "D:/GitHub/ccbox\\nested"),
        Some("/d/GitHub/ccbox/nested".to_string())
    );
}
