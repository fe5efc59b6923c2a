use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use codejudge::config::{Language, SandboxConfig, TestCase};
use codejudge::judge::{Judge, JudgeSettings, SentinelRegistry, Submission, Verdict};
use codejudge::sandbox::protocol::{
    HarnessOutcome, HarnessRequest, HarnessResponse, RequestOutcome, ReturnedValue,
    SyntheticResponse,
};
use codejudge::sandbox::{RawOutcome, SandboxRunner};

type Script = Box<dyn Fn(&HarnessRequest) -> Result<RawOutcome> + Send + Sync>;

/// A sandbox whose behaviour is scripted by the test
struct ScriptedRunner {
    script: Script,
    requests: Mutex<Vec<HarnessRequest>>,
}

impl ScriptedRunner {
    fn new(script: impl Fn(&HarnessRequest) -> Result<RawOutcome> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<HarnessRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SandboxRunner for ScriptedRunner {
    fn build(_id: u8, _config: Arc<SandboxConfig>) -> Result<Self> {
        Err(anyhow!("scripted runners are built by hand"))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn execute(&self, request: &HarnessRequest) -> Result<RawOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        (self.script)(request)
    }
}

fn finished(console: &str, outcome: HarnessOutcome) -> RawOutcome {
    RawOutcome::Finished(HarnessResponse {
        console: console.to_string(),
        outcome,
    })
}

fn returned_scalar(text: &str) -> HarnessOutcome {
    HarnessOutcome::Returned {
        value: ReturnedValue::Scalar {
            text: text.to_string(),
        },
    }
}

fn case(input: &str, expected: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected.to_string(),
    }
}

fn judge() -> Judge {
    Judge::new(JudgeSettings::from(&SandboxConfig::default()))
}

fn call_input(request: &HarnessRequest) -> &Value {
    match request {
        HarnessRequest::Call { input, .. } => input,
        other => panic!("expected a call request, got {other:?}"),
    }
}

/// Mimics what the palindrome solution computes inside the interpreter
fn palindrome_runner() -> ScriptedRunner {
    ScriptedRunner::new(|request| {
        let text = call_input(request).as_str().unwrap_or_default();
        let cleaned: String = text
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let reversed: String = cleaned.chars().rev().collect();
        Ok(finished("", returned_scalar(&(cleaned == reversed).to_string())))
    })
}

const PALINDROME: &str = "function isPalindrome(str){const c=str.replace(/[^a-zA-Z0-9]/g,'').toLowerCase();return c===c.split('').reverse().join('');}";

#[test]
fn test_palindrome_end_to_end() {
    let runner = palindrome_runner();
    let verdict = judge().execute_code(
        &runner,
        PALINDROME,
        Language::JavaScript,
        &[case("racecar", "true"), case("hello", "false")],
    );

    assert_eq!(
        verdict,
        serde_json::from_value::<Verdict>(json!({
            "passed": true,
            "results": [
                {"input": "racecar", "expectedOutput": "true", "actualOutput": "true", "passed": true},
                {"input": "hello", "expectedOutput": "false", "actualOutput": "false", "passed": true}
            ],
            "consoleOutput": ""
        }))
        .unwrap()
    );

    // one fresh interpreter per case
    let requests = runner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| matches!(
        r,
        HarnessRequest::Call { function_name, .. } if function_name == "isPalindrome"
    )));
}

#[test]
fn test_results_follow_case_order() {
    let runner = palindrome_runner();
    let cases: Vec<TestCase> = (0..12)
        .map(|i| case(&format!("input-{i}"), if i % 3 == 0 { "true" } else { "false" }))
        .collect();
    let verdict = judge().execute_code(&runner, PALINDROME, Language::JavaScript, &cases);

    assert_eq!(verdict.results.len(), cases.len());
    for (result, case) in verdict.results.iter().zip(&cases) {
        assert_eq!(result.input, case.input);
        assert_eq!(result.expected_output, case.expected_output);
    }
    assert!(!verdict.passed);
    assert_eq!(
        verdict.results.iter().filter(|r| r.passed).count(),
        8 // the twelve inputs are never palindromes
    );
}

#[test]
fn test_grading_twice_gives_the_same_verdict() {
    let runner = palindrome_runner();
    let submission = Submission {
        source_text: PALINDROME.to_string(),
        language: Language::JavaScript,
        test_cases: vec![case("A man a plan a canal Panama", "true"), case("abc", "true")],
        challenge_id: Some(1),
    };
    let first = judge().grade(&runner, &submission);
    let second = judge().grade(&runner, &submission);
    assert_eq!(first, second);
    assert!(!first.passed);
}

#[test]
fn test_structured_and_scalar_outputs() {
    let runner = ScriptedRunner::new(|request| {
        let outcome = match call_input(request) {
            Value::Array(_) => HarnessOutcome::Returned {
                value: ReturnedValue::Structured {
                    value: json!([1, 2, 3]),
                },
            },
            _ => returned_scalar("120"),
        };
        Ok(finished("", outcome))
    });

    let verdict = judge().execute_code(
        &runner,
        "function solve(x) { return x; }",
        Language::JavaScript,
        &[case("[3, 2, 1]", " [1, 2, 3] "), case("5", "120")],
    );
    assert!(verdict.passed);
    assert_eq!(verdict.results[0].actual_output, "[1,2,3]");
    assert_eq!(verdict.results[1].actual_output, "120");
}

#[test]
fn test_undefined_return_value() {
    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "",
            HarnessOutcome::Returned {
                value: ReturnedValue::Undefined,
            },
        ))
    });
    let verdict = judge().execute_code(
        &runner,
        "function noop() {}",
        Language::JavaScript,
        &[case("x", "undefined"), case("y", "null")],
    );
    assert!(verdict.results[0].passed);
    assert!(!verdict.results[1].passed);
    assert_eq!(verdict.results[1].actual_output, "undefined");
}

#[test]
fn test_failures_stay_in_their_case() {
    let runner = ScriptedRunner::new(|request| {
        Ok(match call_input(request).as_str() {
            Some("throw") => finished(
                "about to fail\n",
                HarnessOutcome::Raised {
                    message: "boom".to_string(),
                },
            ),
            Some("spin") => RawOutcome::timed_out(),
            Some("crash") => RawOutcome::Crashed {
                info: "Process terminated by signal 9".to_string(),
            },
            _ => finished("ok\n", returned_scalar("fine")),
        })
    });

    let verdict = judge().execute_code(
        &runner,
        "function maybe(x) {}",
        Language::JavaScript,
        &[
            case("throw", "fine"),
            case("spin", "fine"),
            case("crash", "fine"),
            case("good", "fine"),
        ],
    );

    let actual: Vec<&str> = verdict
        .results
        .iter()
        .map(|r| r.actual_output.as_str())
        .collect();
    assert_eq!(
        actual,
        vec![
            "Error: boom",
            "Error: Timeout: execution exceeded 2000 ms",
            "Error: Process terminated by signal 9",
            "fine",
        ]
    );
    assert_eq!(
        verdict.results.iter().map(|r| r.passed).collect::<Vec<_>>(),
        vec![false, false, false, true]
    );
    assert!(!verdict.passed);
    // captured text is concatenated in case order
    assert_eq!(verdict.console_output, "about to fail\nok\n");
}

#[test]
fn test_timeout_uses_configured_budget() {
    let judge = Judge::new(JudgeSettings {
        time_limit: Duration::from_millis(300),
        ..JudgeSettings::from(&SandboxConfig::default())
    });
    let runner = ScriptedRunner::new(|_| Ok(RawOutcome::timed_out()));
    let verdict = judge.execute_code(
        &runner,
        "function forever() { while (true) {} }",
        Language::JavaScript,
        &[case("1", "1")],
    );
    assert_eq!(
        verdict.results[0].actual_output,
        "Error: Timeout: execution exceeded 300 ms"
    );
    let HarnessRequest::Call { time_limit_ms, .. } = &runner.requests()[0] else {
        panic!("expected a call request");
    };
    assert_eq!(*time_limit_ms, 300);
}

#[test]
fn test_sandbox_backend_failure_is_reported_not_raised() {
    let runner = ScriptedRunner::new(|_| Err(anyhow!("Failed to spawn node")));
    let verdict = judge().execute_code(
        &runner,
        "function f(x) { return x; }",
        Language::JavaScript,
        &[case("1", "1")],
    );
    assert!(!verdict.passed);
    assert_eq!(
        verdict.results[0].actual_output,
        "Error: Sandbox unavailable: Failed to spawn node"
    );
}

#[test]
fn test_zero_cases_plain_run() {
    let runner = ScriptedRunner::new(|_| Ok(finished("hello\n", HarnessOutcome::Completed)));
    let verdict = judge().execute_code(&runner, "console.log('hello')", Language::JavaScript, &[]);
    assert_eq!(
        verdict,
        Verdict {
            passed: true,
            results: vec![],
            console_output: "hello\n".to_string(),
        }
    );
    assert!(matches!(runner.requests()[0], HarnessRequest::Plain { .. }));

    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "before\n",
            HarnessOutcome::Raised {
                message: "nope is not defined".to_string(),
            },
        ))
    });
    let verdict = judge().execute_code(&runner, "console.log('before'); nope()", Language::JavaScript, &[]);
    assert!(!verdict.passed);
    assert!(verdict.results.is_empty());
    assert_eq!(verdict.console_output, "before\nError: nope is not defined");

    let runner = ScriptedRunner::new(|_| Ok(RawOutcome::timed_out()));
    let verdict = judge().execute_code(&runner, "while (true) {}", Language::JavaScript, &[]);
    assert!(!verdict.passed);
    assert_eq!(
        verdict.console_output,
        "Error: Timeout: execution exceeded 2000 ms"
    );
}

#[test]
fn test_other_languages_are_not_executed() {
    let runner = ScriptedRunner::new(|_| panic!("must not run"));
    for language in [Language::Python, Language::Java, Language::Cpp, Language::Rust, Language::Go] {
        let verdict = judge().execute_code(&runner, "anything", language, &[case("5", "120")]);
        assert!(!verdict.passed);
        assert_eq!(
            verdict.results[0].actual_output,
            format!("Not executed: {language} submissions are not executed in this environment")
        );
    }
}

const PRODUCTS_API: &str = r#"
const express = require('express');
function createProductsAPI() {
  const app = express();
  app.use(express.json());
  return app;
}
module.exports = createProductsAPI;
"#;

fn rest_cases() -> Vec<TestCase> {
    vec![
        case(
            "GET /api/products",
            r#"[{"id":1,"name":"Product 1","price":100},{"id":2,"name":"Product 2","price":200}]"#,
        ),
        case("GET /api/products/1", "Product with id 1"),
        case(
            r#"POST /api/products {"name":"New Product","price":300}"#,
            "201 Created response",
        ),
        case(
            r#"PUT /api/products/2 {"name":"Updated Product"}"#,
            r#"{"id":2,"name":"Updated Product","price":200}"#,
        ),
        case("DELETE /api/products/1", ""),
    ]
}

fn response(status: u16, body: Value) -> RequestOutcome {
    RequestOutcome::Response(SyntheticResponse {
        status,
        body: Some(body),
        text: None,
    })
}

#[test]
fn test_rest_api_path() {
    let runner = ScriptedRunner::new(|request| {
        let HarnessRequest::Http { requests, .. } = request else {
            panic!("expected an http request");
        };
        let responses = requests
            .iter()
            .map(|r| match (r.method.as_str(), r.path.as_str()) {
                ("GET", "/api/products") => response(
                    200,
                    json!([{"id": 1, "name": "Product 1", "price": 100}, {"id": 2, "name": "Product 2", "price": 200}]),
                ),
                ("GET", _) => response(200, json!({"id": 1, "name": "Product 1", "price": 100})),
                ("POST", _) => response(201, json!({"id": 3, "name": "New Product", "price": 300})),
                // key order differs from the expectation on purpose
                ("PUT", _) => response(200, json!({"name": "Updated Product", "id": 2, "price": 200})),
                _ => RequestOutcome::Response(SyntheticResponse {
                    status: 204,
                    body: None,
                    text: None,
                }),
            })
            .collect();
        Ok(finished("", HarnessOutcome::Responses { responses }))
    });

    let verdict = judge().execute_code(&runner, PRODUCTS_API, Language::JavaScript, &rest_cases());
    assert!(verdict.passed, "{verdict:#?}");
    assert_eq!(verdict.results[4].actual_output, "");
    assert!(
        verdict
            .console_output
            .starts_with("Evaluating REST API via createProductsAPI")
    );

    // the whole submission runs in one interpreter
    let requests = runner.requests();
    assert_eq!(requests.len(), 1);
    let HarnessRequest::Http {
        entry_point,
        requests: sent,
        time_limit_ms,
        ..
    } = &requests[0]
    else {
        panic!("expected an http request");
    };
    assert_eq!(entry_point, "createProductsAPI");
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[2].body, Some(json!({"name": "New Product", "price": 300})));
    // building the app and each request are bounded one by one
    assert_eq!(*time_limit_ms, 2000);
    assert_eq!(requests[0].budget(), Duration::from_millis(2000 * 6));
}

#[test]
fn test_slow_handler_fails_only_its_case() {
    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "",
            HarnessOutcome::Responses {
                responses: vec![
                    response(200, json!([{"id": 1}])),
                    RequestOutcome::TimedOut,
                    response(200, json!({"id": 1})),
                ],
            },
        ))
    });
    let verdict = judge().execute_code(
        &runner,
        PRODUCTS_API,
        Language::JavaScript,
        &[
            case("GET /api/products", "Array of products"),
            case(r#"POST /api/products {"name":"x"}"#, "201 Created response"),
            case("GET /api/products/1", "Product with id 1"),
        ],
    );
    assert_eq!(
        verdict.results.iter().map(|r| r.passed).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    assert_eq!(
        verdict.results[1].actual_output,
        "Error: Timeout: execution exceeded 2000 ms"
    );
}

#[test]
fn test_killed_replay_keeps_settled_responses() {
    let runner = ScriptedRunner::new(|_| {
        Ok(RawOutcome::TimedOut {
            completed: vec![response(200, json!([{"id": 1}]))],
        })
    });
    let verdict = judge().execute_code(
        &runner,
        PRODUCTS_API,
        Language::JavaScript,
        &[
            case("GET /api/products", "Array of products"),
            case("GET /api/products/1", "Product with id 1"),
            case("DELETE /api/products/1", ""),
        ],
    );
    let actual: Vec<&str> = verdict
        .results
        .iter()
        .map(|r| r.actual_output.as_str())
        .collect();
    assert_eq!(
        actual,
        vec![
            r#"[{"id":1}]"#,
            "Error: Timeout: execution exceeded 2000 ms",
            "Error: Not run: an earlier request exceeded the time limit",
        ]
    );
    assert!(verdict.results[0].passed);
    assert!(!verdict.passed);
    assert!(
        verdict
            .console_output
            .contains("Error evaluating REST API: Timeout: execution exceeded 2000 ms")
    );
}

#[test]
fn test_app_build_timeout_fails_every_case() {
    let runner = ScriptedRunner::new(|_| Ok(finished("", HarnessOutcome::TimedOut)));
    let verdict = judge().execute_code(&runner, PRODUCTS_API, Language::JavaScript, &rest_cases());
    assert!(
        verdict
            .results
            .iter()
            .all(|r| r.actual_output == "Error: Timeout: execution exceeded 2000 ms")
    );
}

#[test]
fn test_no_content_needs_empty_expectation() {
    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "",
            HarnessOutcome::Responses {
                responses: vec![RequestOutcome::Response(SyntheticResponse {
                    status: 204,
                    body: None,
                    text: None,
                })],
            },
        ))
    });
    let verdict = judge().execute_code(
        &runner,
        PRODUCTS_API,
        Language::JavaScript,
        &[case("DELETE /api/products/1", "{}")],
    );
    assert!(!verdict.passed);
}

#[test]
fn test_malformed_entry_point_fails_every_case() {
    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "",
            HarnessOutcome::MalformedEntryPoint {
                message: "Invalid Express app returned. Make sure your function returns an Express app."
                    .to_string(),
            },
        ))
    });
    let verdict = judge().execute_code(
        &runner,
        "function createProductsAPI() { return 42; }",
        Language::JavaScript,
        &rest_cases(),
    );

    assert!(!verdict.passed);
    assert_eq!(verdict.results.len(), 5);
    let expected =
        "Error: Invalid Express app returned. Make sure your function returns an Express app.";
    assert!(verdict.results.iter().all(|r| r.actual_output == expected && !r.passed));
    assert!(verdict.console_output.contains("Error evaluating REST API: Invalid Express app returned."));
}

#[test]
fn test_missing_factory_is_a_malformed_entry_point() {
    let runner = ScriptedRunner::new(|request| {
        let HarnessRequest::Http { entry_point, .. } = request else {
            panic!("expected an http request");
        };
        Ok(finished(
            "",
            HarnessOutcome::MalformedEntryPoint {
                message: format!("{entry_point} is not defined"),
            },
        ))
    });
    let verdict = judge().execute_code(
        &runner,
        "// nothing here yet",
        Language::JavaScript,
        &rest_cases(),
    );
    assert!(
        verdict
            .results
            .iter()
            .all(|r| r.actual_output == "Error: createProductsAPI is not defined")
    );
}

#[test]
fn test_bad_request_line_fails_only_its_case() {
    let runner = ScriptedRunner::new(|request| {
        let HarnessRequest::Http { requests, .. } = request else {
            panic!("expected an http request");
        };
        let responses = requests
            .iter()
            .map(|_| response(200, json!([{"id": 1}, {"id": 2}])))
            .collect();
        Ok(finished("", HarnessOutcome::Responses { responses }))
    });

    let verdict = judge().execute_code(
        &runner,
        PRODUCTS_API,
        Language::JavaScript,
        &[
            case("GET /api/products", "Array of products"),
            case("HEAD /api/products", "Array of products"),
            case("GET /api/products {broken", "Array of products"),
        ],
    );

    assert!(verdict.results[0].passed);
    assert_eq!(
        verdict.results[1].actual_output,
        "Error: Unsupported HTTP method: HEAD"
    );
    assert!(verdict.results[2].passed);
    assert!(verdict.console_output.contains("Error parsing request body: "));

    let HarnessRequest::Http { requests, .. } = &runner.requests()[0] else {
        panic!("expected an http request");
    };
    assert_eq!(requests.len(), 2);
}

#[test]
fn test_custom_sentinels() {
    let mut sentinels = SentinelRegistry::empty();
    sentinels.register("Teapot", |r| r.status == 418);
    let judge = Judge::with_sentinels(JudgeSettings::from(&SandboxConfig::default()), sentinels);

    let runner = ScriptedRunner::new(|_| {
        Ok(finished(
            "",
            HarnessOutcome::Responses {
                responses: vec![
                    RequestOutcome::Response(SyntheticResponse {
                        status: 418,
                        body: None,
                        text: Some("I'm a teapot".to_string()),
                    }),
                    RequestOutcome::Failed {
                        message: "handler threw: nope".to_string(),
                    },
                ],
            },
        ))
    });
    let verdict = judge.execute_code(
        &runner,
        PRODUCTS_API,
        Language::JavaScript,
        &[case("GET /brew", "Teapot"), case("GET /products", "Array of products")],
    );
    assert!(verdict.results[0].passed);
    assert_eq!(verdict.results[0].actual_output, "I'm a teapot");
    assert_eq!(verdict.results[1].actual_output, "Error: handler threw: nope");
}
