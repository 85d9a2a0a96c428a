//! Demo lone binary: an echoing resource useful for exercising a family
//! deployment end to end. Real lones link against the library the same
//! way: build a `Lone`, hand it to `cli::run`.

use laf::lone::{echo_lone, Outcome};

fn main() {
    let mut lone = echo_lone("echo");
    lone.register("get_echo", |pk, obj| {
        Outcome::ok(serde_json::json!({ "pk": pk, "input": obj }))
    });
    laf::cli::run(&lone)
}
