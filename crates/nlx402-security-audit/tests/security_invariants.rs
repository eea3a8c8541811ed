//! Security invariant tests for the nlx402 gateway.
//!
//! Source-level checks that pin down the properties payment gating relies on:
//! atomic nonce and quota updates, redacted error bodies, constant-time
//! secret comparison. They run on every `cargo test --workspace`.

use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn crates_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// Read all .rs source files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let mut files = Vec::new();

    for entry in WalkDir::new(crates_dir()).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit") {
            continue;
        }
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.replace('\\', "/"), content));
        }
    }

    assert!(!files.is_empty(), "no production sources found");
    files
}

/// Source of a single production file, by path suffix.
fn source(suffix: &str) -> String {
    production_source_files()
        .into_iter()
        .find(|(path, _)| path.ends_with(suffix))
        .map(|(_, content)| production_lines(&content))
        .unwrap_or_else(|| panic!("{suffix} not found"))
}

/// Drop everything from the first `#[cfg(test)]` or `mod tests` onward.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        result.push(line);
    }

    result.join("\n")
}

/// Text of `fn name` up to the next top-level or impl-level item.
fn function_body<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let start = content.find(&format!("fn {name}"))?;
    let rest = &content[start..];
    let end = rest[1..]
        .find("\n    fn ")
        .or_else(|| rest[1..].find("\n    pub fn "))
        .or_else(|| rest[1..].find("\nfn "))
        .or_else(|| rest[1..].find("\npub fn "))
        .or_else(|| rest[1..].find("\npub async fn "))
        .map(|i| i + 1)
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

#[test]
fn no_hardcoded_secrets_in_production_code() {
    let hex_64_re = Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        if let Some(mat) = hex_64_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            panic!(
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                line_num,
                mat.as_str()
            );
        }
    }
}

#[test]
fn nonce_consumption_is_a_single_conditional_update() {
    let sqlite = source("store/sqlite.rs");
    let body = function_body(&sqlite, "consume_nonce").expect("consume_nonce exists");

    let update_re = Regex::new(
        r"(?s)UPDATE quotes SET state = 'consumed'.*WHERE nonce = \?1 AND state = 'pending' AND expires_at > \?2.*RETURNING",
    )
    .unwrap();
    assert!(
        update_re.is_match(body),
        "consume_nonce must flip PENDING to CONSUMED in one conditional UPDATE … RETURNING"
    );
    assert!(
        !body.contains("UPDATE quotes SET state = 'consumed' WHERE nonce = ?1\""),
        "unconditional nonce update found"
    );
}

#[test]
fn quota_decrement_is_a_single_conditional_update() {
    let sqlite = source("store/sqlite.rs");
    let body = function_body(&sqlite, "consume_token").expect("consume_token exists");

    let update_re = Regex::new(
        r"(?s)UPDATE access_tokens SET queries_used = queries_used \+ \?2.*expires_at > \?3.*queries_used \+ \?2 <= queries_allowed.*RETURNING",
    )
    .unwrap();
    assert!(
        update_re.is_match(body),
        "consume_token must bound the increment inside the UPDATE itself"
    );
    assert!(
        !body.contains("SELECT queries_used"),
        "consume_token must not read the counter before writing it"
    );
}

#[test]
fn unlock_commit_runs_in_one_transaction() {
    let sqlite = source("store/sqlite.rs");
    let body = function_body(&sqlite, "commit_unlock").expect("commit_unlock exists");

    assert!(body.contains("TransactionBehavior::Immediate"));
    let consume = body.find("consume_nonce").expect("nonce consumed in commit");
    let commit = body.find(".commit()").expect("transaction committed");
    assert!(consume < commit);
}

#[test]
fn payment_must_carry_the_quote_memo() {
    let verifier = source("verifier.rs");
    let body = function_body(&verifier, "check_transaction").expect("check_transaction exists");

    assert!(
        body.contains("has_memo(&quote.nonce.payment_memo())"),
        "a transfer must name the nonce it pays for"
    );
    assert!(body.contains("Nlx402Error::PaymentNotBound"));
}

#[test]
fn memory_store_consumes_under_shard_lock() {
    let memory = source("store/memory.rs");
    let body = function_body(&memory, "commit_unlock").expect("commit_unlock exists");

    assert!(
        body.contains("get_mut("),
        "in-memory commit must hold the quote entry lock while consuming"
    );
}

#[test]
fn metered_calls_are_gated_before_forwarding() {
    let metered = source("routes/metered.rs");
    let body = function_body(&metered, "rpc<").expect("rpc handler exists");

    let gate = body.find("require_access").expect("rpc handler runs the gate");
    let forward = body.find("forward_rpc").expect("rpc handler forwards");
    assert!(gate < forward, "the gate must run before the upstream call");
    assert!(body.contains("require_access(&state.gate, &req, units)?"));
}

#[test]
fn proxy_does_not_forward_client_headers() {
    let proxy = source("nlx402-gateway/src/proxy.rs");
    assert!(
        !proxy.contains("req.headers()") && !proxy.contains("HttpRequest"),
        "the upstream call must not carry the caller's Authorization header"
    );
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()).",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("subtle::") || prod_content.contains("use subtle"),
                "File {} contains constant_time_eq that doesn't use the subtle crate.",
                path
            );
        }
    }
}

#[test]
fn metrics_token_compared_in_constant_time() {
    let health = source("routes/health.rs");
    let body = function_body(&health, "metrics").expect("metrics handler exists");

    assert!(body.contains("constant_time_eq("));
    assert!(
        !body.contains("== expected_token") && !body.contains("expected_token =="),
        "metrics token must not be compared with =="
    );
}

#[test]
fn error_responses_do_not_leak_internals() {
    let dangerous_patterns = ["SqliteFailure", "database is locked", "stack trace", "RUST_BACKTRACE"];

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse") {
            continue;
        }

        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            for pattern in &dangerous_patterns {
                if line.contains(pattern) && line.contains("json") {
                    panic!(
                        "Potentially sensitive error detail '{}' found in HTTP response at {}:{}.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }

    let error = source("nlx402-gateway/src/error.rs");
    assert!(
        error.contains("Nlx402Error::Storage(msg)") && error.contains("\"An internal error occurred\""),
        "storage failures must be answered with a generic message"
    );
}

#[test]
fn gateway_persists_to_sqlite() {
    let main = source("nlx402-gateway/src/main.rs");
    assert!(
        main.contains("SqliteStore::open") && !main.contains("InMemoryStore"),
        "the gateway must persist nonces and tokens across restarts"
    );
}

#[test]
fn core_library_does_not_panic_on_errors() {
    let core_src = crates_dir().join("nlx402").join("src");

    for (path, content) in &production_source_files() {
        if !Path::new(path).starts_with(&core_src) && !path.contains("/nlx402/src/") {
            continue;
        }

        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            let code = line.split("//").next().unwrap_or("");
            assert!(
                !code.contains(".unwrap()") && !code.contains(".expect("),
                "panicking call in library code at {}:{}: {}",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn token_ids_come_from_csprng() {
    let security = source("nlx402/src/security.rs");
    let body = function_body(&security, "generate_token_id").expect("generate_token_id exists");

    assert!(body.contains("rand::random") || body.contains("rand::rng"));
    assert!(body.contains("TOKEN_ID_BYTES"));
}
