//! Path, URL and file-name templates.
//!
//! Templates use brace placeholders with an optional format spec, e.g.
//! `gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}` or `mem{mem:03d}`. Doubled braces
//! (`{{`, `}}`) produce literal braces.

use chrono::NaiveDateTime;

use crate::date::{bin6, hh_even};
use crate::error::{Error, Result};

/// Every placeholder a template may use.
pub const PLACEHOLDERS: [&str; 14] = [
    "bin6",
    "ens_group",
    "fcst_hr",
    "dd",
    "hh",
    "hh_even",
    "jjj",
    "mem",
    "mm",
    "yy",
    "yyyy",
    "yyyymm",
    "yyyymmdd",
    "yyyymmddhh",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    Int(i64),
}

fn lookup(
    name: &str,
    cycle_date: &NaiveDateTime,
    fcst_hr: u32,
    mem: Option<u32>,
    ens_group: Option<u32>,
) -> Result<Value> {
    let date = |fmt: &str| Ok(Value::Str(cycle_date.format(fmt).to_string()));
    match name {
        "bin6" => Ok(Value::Str(bin6(cycle_date))),
        "hh_even" => Ok(Value::Str(hh_even(cycle_date))),
        "fcst_hr" => Ok(Value::Int(i64::from(fcst_hr))),
        "mem" => mem
            .map(|m| Value::Int(i64::from(m)))
            .ok_or_else(|| Error::Template("template uses {mem} but no ensemble member was given".into())),
        "ens_group" => ens_group
            .map(|g| Value::Int(i64::from(g)))
            .ok_or_else(|| Error::Template("template uses {ens_group} but no ensemble group was given".into())),
        "dd" => date("%d"),
        "hh" => date("%H"),
        "jjj" => date("%j"),
        "mm" => date("%m"),
        "yy" => date("%y"),
        "yyyy" => date("%Y"),
        "yyyymm" => date("%Y%m"),
        "yyyymmdd" => date("%Y%m%d"),
        "yyyymmddhh" => date("%Y%m%d%H"),
        _ => Err(Error::Template(format!("unknown placeholder {{{name}}}"))),
    }
}

/// Fill `template` with date fields derived from `cycle_date` plus the
/// forecast hour, ensemble member and ensemble group.
///
/// Placeholders that are not in the template are never evaluated, so a
/// missing `mem` only matters when the template asks for `{mem}`.
pub fn fill(
    template: &str,
    cycle_date: &NaiveDateTime,
    fcst_hr: u32,
    mem: Option<u32>,
    ens_group: Option<u32>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

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
            '}' => {
                return Err(Error::Template(format!("single '}}' in template: {template}")));
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for f in chars.by_ref() {
                    if f == '}' {
                        closed = true;
                        break;
                    }
                    field.push(f);
                }
                if !closed {
                    return Err(Error::Template(format!("unclosed '{{' in template: {template}")));
                }

                let (name, spec) = match field.split_once(':') {
                    Some((n, s)) => (n.trim(), s),
                    None => (field.trim(), ""),
                };
                let value = lookup(name, cycle_date, fcst_hr, mem, ens_group)?;
                out.push_str(&apply_spec(&value, spec)?);
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Supports the `[[fill]align][0][width][type]` subset of format specs.
fn apply_spec(value: &Value, spec: &str) -> Result<String> {
    let bad = || Error::Template(format!("unsupported format spec '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^');
    let mut fill_char = ' ';
    let mut align = None;
    if chars.len() >= 2 && is_align(chars[1]) {
        fill_char = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }

    let mut zero = false;
    if align.is_none() && chars.get(i) == Some(&'0') {
        zero = true;
        i += 1;
    }

    let width_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let width: usize = if i > width_start {
        chars[width_start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| bad())?
    } else {
        0
    };

    let kind = chars.get(i).copied();
    if i + usize::from(kind.is_some()) != chars.len() {
        return Err(bad());
    }

    let (text, numeric) = match (value, kind) {
        (Value::Int(n), None | Some('d')) => (n.to_string(), true),
        (Value::Str(s), None | Some('s')) => (s.clone(), false),
        (Value::Int(_), Some(k)) | (Value::Str(_), Some(k)) => {
            return Err(Error::Template(format!(
                "format code '{k}' does not apply to this placeholder"
            )));
        }
    };

    let len = text.chars().count();
    if len >= width {
        return Ok(text);
    }
    let pad = width - len;

    if zero {
        if numeric && text.starts_with('-') {
            return Ok(format!("-{}{}", "0".repeat(pad), &text[1..]));
        }
        return Ok(format!("{}{text}", "0".repeat(pad)));
    }

    let fill_str = |n: usize| fill_char.to_string().repeat(n);
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{text}{}", fill_str(pad)),
        '^' => format!("{}{text}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        _ => format!("{}{text}", fill_str(pad)),
    })
}
