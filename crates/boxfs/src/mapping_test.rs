// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use rstest::rstest;

use super::{
    encode_session_dir, normalize_host_path, parse_dir_map, parse_path_map, DirMapping,
    ExtensionSet, PathKind,
};

#[rstest]
fn test_path_map_drive_colon_is_not_a_separator() {
    let maps = parse_path_map("D:/GitHub/ccbox:/d/GitHub/ccbox").unwrap();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].from, "D:/GitHub/ccbox");
    assert_eq!(maps[0].to, "/d/GitHub/ccbox");
    assert_eq!(maps[0].kind, PathKind::Drive { letter: b'd' });
}

#[rstest]
fn test_path_map_multiple_entries() {
    let maps = parse_path_map(
        "D:/GitHub/ccbox:/d/GitHub/ccbox;/mnt/d/GitHub/ccbox:/d/GitHub/ccbox;C:/Users/U/.claude:/cfg/.claude",
    )
    .unwrap();
    assert_eq!(maps.len(), 3);
    assert_eq!(maps[1].kind, PathKind::Wsl { letter: b'd' });
    assert_eq!(maps[2].kind, PathKind::Drive { letter: b'c' });
}

#[rstest]
#[case("//server/share/p:/s/p", PathKind::Unc)]
#[case("/mnt/x/proj:/x/proj", PathKind::Wsl { letter: b'x' })]
#[case("/home/user/proj:/home/user/proj", PathKind::Plain)]
fn test_path_map_kinds(#[case] entry: &str, #[case] kind: PathKind) {
    let maps = parse_path_map(entry).unwrap();
    assert_eq!(maps[0].kind, kind);
}

#[rstest]
fn test_path_map_normalizes_backslashes_and_trailing_slash() {
    let maps = parse_path_map(r"D:\GitHub\ccbox\:/d/GitHub/ccbox/").unwrap();
    assert_eq!(maps[0].from, "D:/GitHub/ccbox");
    assert_eq!(maps[0].to, "/d/GitHub/ccbox");
}

#[rstest]
#[case("")]
#[case("no-colon-here")]
#[case("relative/path:/x")]
fn test_path_map_rejects_bad_entries(#[case] entry: &str) {
    if entry.is_empty() {
        // empty specs yield an empty mapping list, not an error
        assert!(parse_path_map(entry).unwrap().is_empty());
    } else {
        parse_path_map(entry).expect_err("entry should be rejected");
    }
}

#[rstest]
fn test_dir_map_parse() {
    let maps = parse_dir_map("-D-GitHub-ccbox:D--GitHub-ccbox").unwrap();
    assert_eq!(
        maps,
        vec![DirMapping {
            container: "-D-GitHub-ccbox".to_string(),
            native: "D--GitHub-ccbox".to_string(),
        }]
    );
}

#[rstest]
fn test_dir_map_rejects_missing_side() {
    parse_dir_map("only-one-side").expect_err("should be rejected");
    parse_dir_map(":native").expect_err("should be rejected");
}

#[rstest]
#[case("/d/GitHub/ccbox", "-d-GitHub-ccbox")]
#[case("D:/GitHub/ccbox", "D--GitHub-ccbox")]
#[case("C:\\Users\\My Project.v2", "C--Users-My-Project-v2")]
fn test_session_encoding(#[case] path: &str, #[case] expected: &str) {
    assert_eq!(encode_session_dir(path), expected);
}

#[rstest]
fn test_extension_set_is_case_insensitive() {
    let set = ExtensionSet::parse("json,JSONL");
    assert!(set.contains_path("a.json"));
    assert!(set.contains_path("b.JSON"));
    assert!(set.contains_path("c.jsonl"));
    assert!(!set.contains_path("d.yaml"));
    assert!(!set.contains_path("json"));
}

#[rstest]
#[case("D:\\GitHub\\ccbox\\", "D:/GitHub/ccbox")]
#[case("d:/", "d:/")]
#[case("d:", "d:/")]
#[case("/mnt/d/x/", "/mnt/d/x")]
fn test_normalize_host_path(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalize_host_path(input), expected);
}
