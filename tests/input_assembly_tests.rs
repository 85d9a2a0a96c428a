mod common;

use common::family_tree;
use laf::cli::{get_cmdline, make_requests};
use laf::config::Mode;
use serde_json::json;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn never_required(
    _pk: Option<&str>,
    _verb: &str,
    _path: Option<&str>,
    _obj: Option<&[serde_json::Value]>,
) -> bool {
    false
}

#[test]
fn defaults_getopt_and_yaml_merge_in_precedence_order() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&[
            "create", "--name", "n1", "--tags", "a,b", "abc", "---", "{size:", "large,", "val:",
            "1}",
        ]),
        never_required,
    )
    .unwrap();
    assert_eq!(cmdline.verb, "create");
    assert_eq!(cmdline.pk.as_deref(), Some("abc"));
    let input = cmdline.input.unwrap();
    assert_eq!(input.len(), 1);
    // Config default (size: small) lost to the inline YAML; getopt flags
    // merged in.
    assert_eq!(
        input[0],
        json!({"size": "large", "val": 1, "name": "n1", "tags": ["a", "b"]})
    );
}

#[test]
fn scalar_list_yaml_fans_out() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["update", "-", "---", "[{_id: a, v: 1}, {_id: b, v: 2}]"]),
        never_required,
    )
    .unwrap();
    let requests = make_requests("foo", &cmdline, Mode::Client).unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].pk.as_deref(), Some("a"));
    assert_eq!(requests[0].obj, Some(json!({"_id": "a", "v": 1})));
    assert_eq!(requests[1].pk.as_deref(), Some("b"));
    assert_eq!(requests[1].obj, Some(json!({"_id": "b", "v": 2})));
    assert_eq!(requests[0].txid, requests[1].txid);
    assert_ne!(requests[0].rqid, requests[1].rqid);
}

#[test]
fn create_with_pk_and_inline_yaml() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["create", "abc", "---", "{val: 1}"]),
        never_required,
    )
    .unwrap();
    let requests = make_requests("foo", &cmdline, Mode::Client).unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.pk.as_deref(), Some("abc"));
    // The default input for create rides along under the yaml.
    assert_eq!(req.obj, Some(json!({"size": "small", "val": 1})));
    assert_eq!(req.txid, req.rqid);
    assert_eq!(req.effective_user, req.user);
}

#[test]
fn obo_flag_sets_effective_user() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["--obo", "bob", "get", "abc"]),
        never_required,
    )
    .unwrap();
    let requests = make_requests("foo", &cmdline, Mode::Client).unwrap();
    assert_eq!(requests[0].obo.as_deref(), Some("bob"));
    assert_eq!(requests[0].effective_user, "bob");
}

#[test]
fn plain_get_produces_a_bare_envelope() {
    let dir = family_tree();
    let cmdline = get_cmdline("foo", dir.path(), &args(&["get"]), never_required).unwrap();
    let requests = make_requests("foo", &cmdline, Mode::Client).unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.lone, "foo");
    assert_eq!(req.verb, "get");
    assert!(req.pk.is_none());
    // get's hardcoded default {} produces one empty object.
    assert_eq!(req.obj, Some(json!({})));
}

#[test]
fn boolean_getopt_flag_applies_to_every_verb() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["get", "--verbose", "yes"]),
        never_required,
    )
    .unwrap();
    assert_eq!(cmdline.input.unwrap(), vec![json!({"verbose": true})]);
}

#[test]
fn path_expression_wraps_flag_and_yaml_input() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["update", "abc[props/color]", "---", "{hue: red}"]),
        never_required,
    )
    .unwrap();
    assert_eq!(cmdline.pk.as_deref(), Some("abc"));
    assert_eq!(cmdline.path.as_deref(), Some("props/color"));
    let input = cmdline.input.unwrap();
    assert_eq!(input[0]["props"]["color"]["hue"], "red");
    // The raw body is kept alongside for sub-path requests.
    assert_eq!(cmdline.body, Some(json!({"hue": "red"})));
}

#[test]
fn custom_verb_keeps_only_the_body() {
    let dir = family_tree();
    let cmdline = get_cmdline(
        "foo",
        dir.path(),
        &args(&["--cm", "CM7", "reindex", "---", "{depth: 2}"]),
        never_required,
    )
    .unwrap();
    let requests = make_requests("foo", &cmdline, Mode::Client).unwrap();
    assert_eq!(requests[0].verb, "reindex");
    assert_eq!(requests[0].cm.as_deref(), Some("CM7"));
    assert_eq!(requests[0].obj, Some(json!({"depth": 2})));
}
