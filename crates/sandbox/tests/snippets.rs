use std::time::{Duration, Instant};

use sandbox::{Denylist, ErrorKind, ExecutionResult, Sandbox, SandboxConfig};

fn run(source: &str) -> ExecutionResult {
    Sandbox::default().execute(source)
}

fn output(source: &str) -> String {
    let result = run(source);
    assert!(result.success, "snippet failed: {:?}", result.error);
    result.output
}

fn error_message(result: &ExecutionResult) -> &str {
    result.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default()
}

#[test]
fn prints_simple_arithmetic() {
    let result = run("print(2 + 2)");
    assert!(result.success);
    assert_eq!(result.output, "4");
    assert!(result.error.is_none());
}

#[test]
fn chapter_style_snippets_run() {
    let source = r#"
name = "Ada"
age = 36
height = 1.68
is_student = False
print(f"{name} is {age} years old and {height:.1f}m tall")
print(type(age).__name__, type(height).__name__, type(is_student).__name__)

fruits = ["apple", "banana", "cherry"]
fruits.append("date")
for i, fruit in enumerate(fruits, start=1):
    print(i, fruit.upper())

scores = {"math": 90, "art": 75}
best = sorted(scores.items())[0]
print(best)
"#;
    let text = output(source);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Ada is 36 years old and 1.7m tall");
    assert_eq!(lines[1], "int float bool");
    assert_eq!(lines[2], "1 APPLE");
    assert_eq!(lines[5], "4 DATE");
    assert_eq!(lines[6], "('art', 75)");
}

#[test]
fn conditionals_and_loops() {
    let source = "\
temperature = 25
if temperature > 30:
    print('hot')
elif temperature > 20:
    print('warm')
else:
    print('cold')

count = 0
while True:
    count += 1
    if count >= 3:
        break
print(count, [n ** 2 for n in range(10) if n % 3 == 0])
";
    assert_eq!(output(source), "warm\n3 [0, 9, 36, 81]");
}

#[test]
fn infinite_loop_times_out_promptly() {
    let sandbox = Sandbox::new(SandboxConfig::default().with_timeout(Duration::from_millis(200)));
    let started = Instant::now();
    let result = sandbox.execute("while True:\n    pass");
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(error_message(&result), "execution timed out");
    assert!(result.output.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn explicit_timeout_overrides_the_default() {
    let result = Sandbox::default().execute_with_timeout(
        "n = 0\nwhile n >= 0:\n    n = n + 1",
        Duration::from_millis(100),
    );
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
}

#[test]
fn denylisted_import_is_rejected_before_running() {
    let result = run("print('side effect')\nimport os\nos.system('ls')");
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
    assert!(error_message(&result).starts_with("policy violation: "));
    assert!(result.output.is_empty());
}

#[test]
fn import_inside_a_one_line_suite_is_rejected_before_running() {
    for source in [
        "print('hi')\nif True: import os",
        "for _ in [1]: import subprocess",
    ] {
        let result = run(source);
        assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation), "{source}");
        assert!(result.output.is_empty());
    }
}

#[test]
fn escape_attributes_are_rejected_even_inside_strings() {
    let result = run("x = ''\nprint(f\"{x.__class__}\")");
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
    let result = run("print(().__class__.__bases__[0].__subclasses__())");
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
}

#[test]
fn overlong_source_is_rejected() {
    let source = format!("print('{}')", "a".repeat(1000));
    let result = run(&source);
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
}

#[test]
fn extra_denylisted_builtin_disappears() {
    let config = SandboxConfig::default().with_denylist(Denylist::default().with_builtins(["sorted"]));
    let result = Sandbox::new(config).execute("print(sorted([3, 1]))");
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
}

#[test]
fn runtime_errors_are_captured_with_line_numbers() {
    let result = run("print('start')\nitems = [1, 2]\nprint(items[5])");
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert_eq!(error_message(&result), "IndexError: list index out of range (line 3)");
    assert_eq!(result.output, "start");
}

#[test]
fn division_by_zero_message() {
    let result = run("x = 10\ny = 0\nprint(x / y)");
    assert_eq!(error_message(&result), "ZeroDivisionError: division by zero (line 3)");
}

#[test]
fn syntax_errors_are_runtime_faults() {
    let result = run("print('unclosed'");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(error_message(&result).starts_with("SyntaxError"));

    let result = run("if True:\nprint('x')");
    assert!(error_message(&result).starts_with("IndentationError"));
}

#[test]
fn type_errors_read_like_python() {
    let result = run("print('age: ' + 5)");
    assert_eq!(
        error_message(&result),
        "TypeError: can only concatenate str (not \"int\") to str (line 1)"
    );
}

#[test]
fn unknown_names_are_name_errors() {
    let result = run("print(undefined_thing)");
    assert_eq!(
        error_message(&result),
        "NameError: name 'undefined_thing' is not defined (line 1)"
    );
}

#[test]
fn recursion_is_bounded() {
    let result = run("def down(n):\n    return down(n + 1)\ndown(0)");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(error_message(&result).starts_with("RecursionError"));
}

#[test]
fn memory_hungry_snippets_fail_cleanly() {
    let result = run("data = [0] * 10 ** 9");
    assert!(error_message(&result).starts_with("MemoryError"));
    let result = run("s = 'x'\nwhile True:\n    s = s + s");
    assert!(error_message(&result).starts_with("MemoryError"));
}

#[test]
fn huge_reprs_fail_fast_with_memory_error() {
    let started = Instant::now();
    let result = Sandbox::default().execute_with_timeout(
        "a = [0] * 100000\nb = [a] * 100000\ns = str(b)",
        Duration::from_secs(10),
    );
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(error_message(&result).starts_with("MemoryError"), "{:?}", result.error);
    assert!(started.elapsed() < Duration::from_secs(5));

    let result = run("d = {}\nfor i in range(50000):\n    d[i] = 'xxxxxxxxxx'\nprint(d)");
    assert!(error_message(&result).starts_with("MemoryError"), "{:?}", result.error);
}

#[test]
fn output_is_capped() {
    let result = run("while True:\n    print('spam' * 100)");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(error_message(&result).starts_with("OutputLimitError"));
    assert_eq!(result.output.len(), 64 * 1024);
}

#[test]
fn integer_overflow_is_reported() {
    let result = run("print(2 ** 200)");
    assert!(error_message(&result).starts_with("OverflowError"));
}

#[test]
fn lazy_ranges_do_not_hit_the_collection_cap() {
    assert_eq!(output("print(sum(range(1_000_000)))"), "499999500000");
}

#[test]
fn results_serialize_with_snake_case_kinds() {
    let result = run("print(1 / 0)");
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["error"]["kind"], "runtime_fault");
    assert_eq!(json["success"], false);
}
