// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use rstest::rstest;

use super::{
    annotate_exit_status, assemble, container_side_path, dir_map_string, path_map_string,
    system_prompt, LaunchOptions, NetworkPolicy,
};
use crate::config::Config;

fn options() -> LaunchOptions {
    LaunchOptions {
        project_dir: "D:/GitHub/ccbox".to_string(),
        project_name: "ccbox".to_string(),
        stack: "go".to_string(),
        config_dir: Some("C:/Users/U/.claude".to_string()),
        fuse: true,
        runtime: Some("docker".to_string()),
        ..Default::default()
    }
}

fn args_of(plan: &super::LaunchPlan) -> Vec<String> {
    plan.command
        .args
        .iter()
        .map(|a| a.to_string_lossy().to_string())
        .collect()
}

#[rstest]
#[case("D:/GitHub/ccbox", "/d/GitHub/ccbox")]
#[case("d:\\Work\\proj", "/d/Work/proj")]
#[case("/mnt/e/code", "/e/code")]
#[case("/home/user/code", "/home/user/code")]
#[case("X:", "/x")]
fn test_container_side_path(#[case] host: &str, #[case] expected: &str) {
    assert_eq!(container_side_path(host), expected);
}

#[rstest]
fn test_path_map_orders_project_alias_then_config() {
    let opts = options();
    assert_eq!(
        path_map_string(&opts),
        "D:/GitHub/ccbox:/d/GitHub/ccbox;/mnt/d/GitHub/ccbox:/d/GitHub/ccbox;C:/Users/U/.claude:/home/agent/.agent"
    );
}

#[rstest]
fn test_path_map_fresh_mode_omits_config_dir() {
    let mut opts = options();
    opts.fresh = true;
    assert_eq!(
        path_map_string(&opts),
        "D:/GitHub/ccbox:/d/GitHub/ccbox;/mnt/d/GitHub/ccbox:/d/GitHub/ccbox"
    );
}

#[rstest]
fn test_path_map_plain_host_has_no_alias() {
    let mut opts = options();
    opts.project_dir = "/home/user/code".to_string();
    opts.config_dir = None;
    assert_eq!(path_map_string(&opts), "/home/user/code:/home/user/code");
}

#[rstest]
fn test_dir_map_bridges_the_two_encodings() {
    let opts = options();
    assert_eq!(
        dir_map_string(&opts).unwrap(),
        "-d-GitHub-ccbox:D--GitHub-ccbox"
    );
}

#[rstest]
fn test_dir_map_omitted_when_spellings_agree() {
    let mut opts = options();
    opts.project_dir = "/home/user/code".to_string();
    assert_eq!(dir_map_string(&opts), None);
}

#[rstest]
fn test_assemble_default_capability_policy() {
    let plan = assemble(&options(), &Config::default()).unwrap();
    let args = args_of(&plan);
    let joined = args.join(" ");
    assert!(joined.contains("--cap-drop ALL"));
    assert!(joined.contains("--cap-add SETUID"));
    assert!(joined.contains("--cap-add SETGID"));
    assert!(joined.contains("--cap-add CHOWN"));
    assert!(joined.contains("--cap-add SYS_ADMIN"));
    assert!(joined.contains("--security-opt no-new-privileges"));
    // full network policy adds no NET_ADMIN
    assert!(!joined.contains("NET_ADMIN"));
}

#[rstest]
fn test_assemble_restricted_network_adds_net_admin() {
    let mut opts = options();
    opts.network = NetworkPolicy::Restricted;
    let plan = assemble(&opts, &Config::default()).unwrap();
    assert!(args_of(&plan).join(" ").contains("--cap-add NET_ADMIN"));
}

#[rstest]
fn test_assemble_privileged_platform_skips_capability_policy() {
    let mut config = Config::default();
    config.container.privileged = true;
    let plan = assemble(&options(), &config).unwrap();
    let joined = args_of(&plan).join(" ");
    assert!(joined.contains("--privileged"));
    assert!(!joined.contains("--cap-drop"));
    assert!(!joined.contains("no-new-privileges"));
}

#[rstest]
fn test_assemble_resource_limits_and_tmpfs() {
    let plan = assemble(&options(), &Config::default()).unwrap();
    let joined = args_of(&plan).join(" ");
    assert!(joined.contains("--pids-limit 2048"));
    assert!(joined.contains("--memory 4g"));
    assert!(joined.contains("--cpus 2"));
    assert!(joined.contains("--cpu-shares 512"));
    assert!(joined.contains("--tmpfs /tmp:rw,noexec,nosuid,nodev,size=512m"));
    assert!(joined.contains("--tmpfs /var/tmp:rw,noexec,nosuid,nodev,size=256m"));
    assert!(joined.contains("--tmpfs /run:rw,noexec,nosuid,nodev,size=64m"));
}

#[rstest]
fn test_assemble_unrestricted_drops_limits() {
    let mut opts = options();
    opts.unrestricted = true;
    let plan = assemble(&opts, &Config::default()).unwrap();
    let joined = args_of(&plan).join(" ");
    assert!(!joined.contains("--pids-limit"));
    assert!(!joined.contains("--memory"));
    assert!(!joined.contains("--cpu-shares"));
}

#[rstest]
fn test_assemble_tty_policy() {
    let plan = assemble(&options(), &Config::default()).unwrap();
    assert!(plan.interactive);
    assert!(args_of(&plan).contains(&"-t".to_string()));

    let mut opts = options();
    opts.headless = true;
    let plan = assemble(&opts, &Config::default()).unwrap();
    assert!(!plan.interactive);
    assert!(!args_of(&plan).contains(&"-t".to_string()));

    let mut opts = options();
    opts.debug = 2;
    let plan = assemble(&opts, &Config::default()).unwrap();
    assert!(!plan.interactive);
}

#[rstest]
fn test_assemble_diverts_secrets_to_env_file() {
    let mut opts = options();
    opts.env = vec![
        ("API_TOKEN".to_string(), "hunter2".to_string()),
        ("EDITOR".to_string(), "vi".to_string()),
    ];
    let plan = assemble(&opts, &Config::default()).unwrap();
    let joined = args_of(&plan).join(" ");

    // the secret value never appears on argv
    assert!(!joined.contains("hunter2"));
    assert!(joined.contains("--env-file"));
    assert!(joined.contains("-e EDITOR=vi"));

    let path = plan.env_file.clone().expect("secrets file should exist");
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "API_TOKEN=hunter2\n");
    plan.remove_env_file();
    assert!(!path.exists());
}

#[rstest]
fn test_assemble_environment_map() {
    let plan = assemble(&options(), &Config::default()).unwrap();
    assert_eq!(plan.env.get("HOME").unwrap(), "/home/agent");
    assert!(plan.env.contains_key(crate::ENV_PATH_MAP));
    assert!(plan.env.contains_key(crate::ENV_DIR_MAP));
    // host and container spellings differ, so the interposer is armed
    assert_eq!(plan.env.get(crate::ENV_HOST_ROOT).unwrap(), "D:/GitHub/ccbox");
    assert!(plan.env.contains_key("BOXFS_UID"));
    assert!(plan.env.contains_key("BOXFS_GID"));
}

#[rstest]
fn test_assemble_plain_host_omits_host_root() {
    let mut opts = options();
    opts.project_dir = "/home/user/code".to_string();
    opts.config_dir = None;
    let plan = assemble(&opts, &Config::default()).unwrap();
    assert!(!plan.env.contains_key(crate::ENV_HOST_ROOT));
    assert!(!plan.env.contains_key(crate::ENV_DIR_MAP));
}

#[rstest]
fn test_assemble_names_and_agent_args() {
    let mut opts = options();
    opts.agent_args = vec!["--resume".to_string(), "abc".to_string()];
    let plan = assemble(&opts, &Config::default()).unwrap();
    assert_eq!(plan.container_name, "boxfs-ccbox");
    assert_eq!(plan.image, "boxfs-go");
    let args = args_of(&plan);
    // agent args ride at the very end, after the image
    assert_eq!(args[args.len() - 3], "boxfs-go");
    assert_eq!(args[args.len() - 2], "--resume");
    assert_eq!(args[args.len() - 1], "abc");
}

#[rstest]
#[case(130, Some("interrupted"))]
#[case(137, Some("killed, possibly out of memory"))]
#[case(139, Some("crashed with a segmentation fault"))]
#[case(143, Some("terminated"))]
#[case(0, None)]
#[case(2, None)]
fn test_exit_status_annotations(#[case] code: i32, #[case] expected: Option<&str>) {
    assert_eq!(annotate_exit_status(code), expected);
}

#[rstest]
fn test_system_prompt_concatenates_user_addition() {
    let mut opts = options();
    opts.system_prompt = Some("Prefer small diffs.".to_string());
    let prompt = system_prompt(&opts);
    assert!(prompt.contains("isolated Linux container"));
    assert!(prompt.contains("Persistent paths: /d/GitHub/ccbox, /home/agent/.agent"));
    assert!(prompt.ends_with("Prefer small diffs."));
}
