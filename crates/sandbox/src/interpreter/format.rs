//! Number formatting and the small format-spec mini language.

use super::errors::{Exception, ExceptionKind, value_error};
use super::value::{ReprBudget, Value};
use crate::parser::ast::FormatSpec;

/// Shortest round-tripping float text, Python style (`1.0`, `1e+16`, `1e-05`).
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let magnitude = f.abs();
    if (1e-4..1e16).contains(&magnitude) {
        let text = format!("{f}");
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let text = format!("{f:e}");
        let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// `{:.Nf}` with Python's spelling of the non-finite values.
pub fn fixed(f: f64, precision: usize) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{f:.precision$}")
    }
}

/// Renders `value` for a replacement field.
pub fn apply_spec(
    value: &Value,
    spec: Option<FormatSpec>,
    budget: &ReprBudget,
) -> Result<String, Exception> {
    match spec {
        None => value.to_str_within(budget),
        Some(FormatSpec::Fixed(precision)) => value
            .as_float()
            .map(|f| fixed(f, precision))
            .ok_or_else(|| unknown_code('f', value)),
        Some(FormatSpec::Integer) => value
            .as_int()
            .map(|n| n.to_string())
            .ok_or_else(|| unknown_code('d', value)),
    }
}

fn unknown_code(code: char, value: &Value) -> Exception {
    value_error(format!(
        "Unknown format code '{code}' for object of type '{}'",
        value.type_name()
    ))
}

/// `str.format` with positional (`{}`, `{0}`) and keyword (`{name}`) fields.
pub fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    budget: &ReprBudget,
) -> Result<String, Exception> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(value_error("Single '{' encountered in format string")),
                    }
                }
                let (name, spec_text) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let spec = if spec_text.is_empty() {
                    None
                } else {
                    Some(FormatSpec::parse(spec_text).ok_or_else(|| {
                        value_error(format!("unsupported format spec '{spec_text}'"))
                    })?)
                };
                let value = if name.is_empty() {
                    let value = args.get(next_auto).ok_or_else(|| {
                        Exception::new(
                            ExceptionKind::IndexError,
                            format!("Replacement index {next_auto} out of range for positional args tuple"),
                        )
                    })?;
                    next_auto += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index).ok_or_else(|| {
                        Exception::new(
                            ExceptionKind::IndexError,
                            format!("Replacement index {index} out of range for positional args tuple"),
                        )
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| {
                            Exception::new(ExceptionKind::KeyError, format!("'{name}'"))
                        })?
                };
                out.push_str(&apply_spec(value, spec, budget)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_print_like_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn specs_apply_to_numbers_only() {
        let b = ReprBudget::default();
        assert_eq!(apply_spec(&Value::Float(1.23456), Some(FormatSpec::Fixed(2)), &b).unwrap(), "1.23");
        assert_eq!(apply_spec(&Value::Int(7), Some(FormatSpec::Fixed(1)), &b).unwrap(), "7.0");
        assert_eq!(apply_spec(&Value::Int(7), Some(FormatSpec::Integer), &b).unwrap(), "7");
        let err = apply_spec(&Value::str("x"), Some(FormatSpec::Integer), &b).unwrap_err();
        assert_eq!(err.message, "Unknown format code 'd' for object of type 'str'");
    }

    #[test]
    fn template_fields() {
        let args = [Value::str("Ada"), Value::Float(0.5)];
        let kwargs = [("n".to_string(), Value::Int(3))];
        let b = ReprBudget::default();
        assert_eq!(
            format_template("{} scored {:.1f} in {n} {{tries}}", &args, &kwargs, &b).unwrap(),
            "Ada scored 0.5 in 3 {tries}"
        );
        assert_eq!(format_template("{1}{0}", &args, &[], &b).unwrap(), "0.5Ada");
        assert!(format_template("{5}", &args, &[], &b).is_err());
    }
}
