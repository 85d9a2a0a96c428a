//! Shared test fixture: a complete on-disk family tree.
#![allow(dead_code)]

use serde_json::json;
use std::path::Path;

pub const FAMILY: &str = "acme/infra";

/// Write a family base directory with one lone (`foo`) and its openapi
/// document, server config, cm policy and CLI options.
pub fn family_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path();
    std::fs::create_dir_all(base.join("etc")).unwrap();
    std::fs::create_dir_all(base.join("schemas")).unwrap();
    std::fs::create_dir_all(base.join("apischemas/openapi")).unwrap();

    std::fs::write(base.join("etc/family"), format!("{FAMILY}\n")).unwrap();
    std::fs::write(base.join("etc/laf-server.yml"), "lones:\n  - foo\n").unwrap();
    std::fs::write(base.join("etc/cm-config.yml"), "foo:\n  create_foo: {}\n").unwrap();
    std::fs::write(
        base.join("schemas/foo.options.yml"),
        concat!(
            "default_input:\n",
            "  create:\n",
            "    size: small\n",
            "getopt:\n",
            "  default:\n",
            "    verbose: boolean\n",
            "  create:\n",
            "    name: string\n",
            "    tags: list\n",
        ),
    )
    .unwrap();

    write_spec(base, "vnd.acme_infra.foo.v3.0.0");
    dir
}

/// Write the foo openapi document under the given vendor file name.
pub fn write_spec(base: &Path, file_name: &str) {
    let ok_response = json!({
        "content": { "application/json": { "schema": { "type": "object" } } }
    });
    let doc = json!({
        "openapi": "3.0.0",
        "info": { "title": "foo", "version": "3.0.0" },
        "components": {
            "schemas": {
                "Foo": {
                    "type": "object",
                    "properties": {
                        "_id": { "type": "string" },
                        "val": { "type": "integer" }
                    }
                },
                "props": { "type": "object" }
            },
            "responses": { "Ok": ok_response },
            "parameters": {
                "PrimaryKey": {
                    "name": "primary_key",
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string" }
                },
                "_cursor": {
                    "name": "_cursor",
                    "in": "query",
                    "schema": { "type": "string" }
                }
            }
        },
        "paths": {
            "/foo": {
                "get": {
                    "operationId": "get_foo_all",
                    "parameters": [ { "$ref": "#/components/parameters/_cursor" } ],
                    "responses": { "Ok": ok_response }
                },
                "post": {
                    "operationId": "create_foo",
                    "parameters": [],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": {
                            "schema": { "$ref": "#/components/schemas/Foo" }
                        } }
                    },
                    "responses": { "Created": ok_response }
                }
            },
            "/foo/{primary_key}": {
                "get": {
                    "operationId": "get_foo",
                    "parameters": [ { "$ref": "#/components/parameters/PrimaryKey" } ],
                    "responses": { "Ok": ok_response }
                },
                "put": {
                    "operationId": "update_foo",
                    "parameters": [ { "$ref": "#/components/parameters/PrimaryKey" } ],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": {
                            "schema": { "$ref": "#/components/schemas/Foo" }
                        } }
                    },
                    "responses": { "Ok": ok_response }
                },
                "delete": {
                    "operationId": "delete_foo",
                    "parameters": [ { "$ref": "#/components/parameters/PrimaryKey" } ],
                    "responses": { "Ok": ok_response }
                }
            }
        }
    });
    std::fs::write(
        base.join("apischemas/openapi").join(file_name),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();
}
