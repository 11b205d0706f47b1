// Unit-aware comparison and addition of (magnitude, unit) pairs.
// Units are parsed into an SI scale factor + offset + dimension exponents, so
// "km/h" converts to "m/s" and "°F" to "°C". Unparsable units never convert.

use std::cmp::Ordering;
use std::str::FromStr;

/// Length, mass, time, current, temperature, amount, luminosity, information, angle.
const DIMS: usize = 9;
const L: usize = 0;
const M: usize = 1;
const T: usize = 2;
const I: usize = 3;
const TH: usize = 4;
const N: usize = 5;
const J: usize = 6;
const INFO: usize = 7;
const ANG: usize = 8;

type Dims = [i8; DIMS];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitParseError {
    #[error("empty unit")]
    Empty,
    #[error("unknown unit symbol `{0}`")]
    UnknownSymbol(String),
    #[error("malformed unit expression `{0}`")]
    Malformed(String),
}

/// A parsed unit: `si = magnitude * factor + offset`, with dimension exponents.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    factor: f64,
    offset: f64,
    dims: Dims,
}

struct BaseUnit {
    symbol: &'static str,
    factor: f64,
    offset: f64,
    dims: Dims,
    prefixable: bool,
}

const fn dims(pairs: &[(usize, i8)]) -> Dims {
    let mut d = [0i8; DIMS];
    let mut i = 0;
    while i < pairs.len() {
        d[pairs[i].0] = pairs[i].1;
        i += 1;
    }
    d
}

const fn base(symbol: &'static str, factor: f64, dims: Dims, prefixable: bool) -> BaseUnit {
    BaseUnit {
        symbol,
        factor,
        offset: 0.0,
        dims,
        prefixable,
    }
}

const ENERGY: Dims = dims(&[(M, 1), (L, 2), (T, -2)]);
const POWER: Dims = dims(&[(M, 1), (L, 2), (T, -3)]);
const PRESSURE: Dims = dims(&[(M, 1), (L, -1), (T, -2)]);
const NONE: Dims = [0; DIMS];

static BASE_UNITS: &[BaseUnit] = &[
    base("m", 1.0, dims(&[(L, 1)]), true),
    base("g", 1e-3, dims(&[(M, 1)]), true),
    base("t", 1e3, dims(&[(M, 1)]), false),
    base("s", 1.0, dims(&[(T, 1)]), true),
    base("min", 60.0, dims(&[(T, 1)]), false),
    base("h", 3600.0, dims(&[(T, 1)]), false),
    base("d", 86400.0, dims(&[(T, 1)]), false),
    base("A", 1.0, dims(&[(I, 1)]), true),
    base("K", 1.0, dims(&[(TH, 1)]), true),
    BaseUnit {
        symbol: "°C",
        factor: 1.0,
        offset: 273.15,
        dims: dims(&[(TH, 1)]),
        prefixable: false,
    },
    BaseUnit {
        symbol: "°F",
        factor: 5.0 / 9.0,
        offset: 459.67 * 5.0 / 9.0,
        dims: dims(&[(TH, 1)]),
        prefixable: false,
    },
    base("mol", 1.0, dims(&[(N, 1)]), true),
    base("cd", 1.0, dims(&[(J, 1)]), true),
    base("lm", 1.0, dims(&[(J, 1)]), true),
    base("lx", 1.0, dims(&[(J, 1), (L, -2)]), true),
    base("B", 8.0, dims(&[(INFO, 1)]), true),
    base("bit", 1.0, dims(&[(INFO, 1)]), true),
    base("Hz", 1.0, dims(&[(T, -1)]), true),
    base("N", 1.0, dims(&[(M, 1), (L, 1), (T, -2)]), true),
    base("Pa", 1.0, PRESSURE, true),
    base("bar", 1e5, PRESSURE, true),
    base("J", 1.0, ENERGY, true),
    base("Wh", 3600.0, ENERGY, true),
    base("W", 1.0, POWER, true),
    base("C", 1.0, dims(&[(I, 1), (T, 1)]), true),
    base("V", 1.0, dims(&[(M, 1), (L, 2), (T, -3), (I, -1)]), true),
    base("Ω", 1.0, dims(&[(M, 1), (L, 2), (T, -3), (I, -2)]), true),
    base("Ohm", 1.0, dims(&[(M, 1), (L, 2), (T, -3), (I, -2)]), true),
    base("l", 1e-3, dims(&[(L, 3)]), true),
    base("L", 1e-3, dims(&[(L, 3)]), true),
    base("rad", 1.0, dims(&[(ANG, 1)]), true),
    base("°", std::f64::consts::PI / 180.0, dims(&[(ANG, 1)]), false),
    base("deg", std::f64::consts::PI / 180.0, dims(&[(ANG, 1)]), false),
    base("%", 1e-2, NONE, false),
    base("‰", 1e-3, NONE, false),
    base("ppm", 1e-6, NONE, false),
    base("ppb", 1e-9, NONE, false),
];

// Two-letter prefix first so "dam" is deca-metre, not deci-"am".
static PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("µ", 1e-6),
    ("μ", 1e-6),
    ("u", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

fn lookup_atom(atom: &str) -> Option<(f64, f64, Dims)> {
    if let Some(b) = BASE_UNITS.iter().find(|b| b.symbol == atom) {
        return Some((b.factor, b.offset, b.dims));
    }
    PREFIXES.iter().find_map(|(prefix, scale)| {
        let rest = atom.strip_prefix(prefix)?;
        let b = BASE_UNITS
            .iter()
            .find(|b| b.prefixable && b.symbol == rest)?;
        Some((b.factor * scale, 0.0, b.dims))
    })
}

fn is_operator(c: char) -> bool {
    matches!(c, '*' | '·' | '⋅' | '/' | ' ')
}

fn superscript_digit(c: char) -> Option<i32> {
    Some(match c {
        '⁰' => 0,
        '¹' => 1,
        '²' => 2,
        '³' => 3,
        '⁴' => 4,
        '⁵' => 5,
        '⁶' => 6,
        '⁷' => 7,
        '⁸' => 8,
        '⁹' => 9,
        _ => return None,
    })
}

fn is_exponent_start(c: char) -> bool {
    c == '^' || c == '⁻' || c.is_ascii_digit() || superscript_digit(c).is_some()
}

/// Reads an exponent at the start of `s`; returns the exponent and the rest.
fn read_exponent<'a>(s: &'a str, expr: &str) -> Result<(i32, &'a str), UnitParseError> {
    let malformed = || UnitParseError::Malformed(expr.to_string());
    let (rest, superscript) = match s.strip_prefix('^') {
        Some(r) => (r, false),
        None => (s, s.starts_with('⁻') || s.starts_with(|c| superscript_digit(c).is_some())),
    };
    let mut chars = rest.char_indices().peekable();
    let mut negative = false;
    if let Some(&(_, c)) = chars.peek()
        && ((superscript && c == '⁻') || (!superscript && c == '-'))
    {
        negative = true;
        chars.next();
    }
    let mut value: i32 = 0;
    let mut digits = 0;
    let mut end = rest.len();
    for (idx, c) in chars {
        let d = if superscript {
            superscript_digit(c)
        } else {
            c.to_digit(10).map(|d| d as i32)
        };
        match d {
            Some(d) => {
                value = value.checked_mul(10).and_then(|v| v.checked_add(d)).ok_or_else(malformed)?;
                digits += 1;
            }
            None => {
                end = idx;
                break;
            }
        }
    }
    if digits == 0 {
        return Err(malformed());
    }
    Ok((if negative { -value } else { value }, &rest[end..]))
}

impl FromStr for Unit {
    type Err = UnitParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(UnitParseError::Empty);
        }

        let mut factor = 1.0;
        let mut offset = 0.0;
        let mut dims: Dims = NONE;
        let mut terms = 0;
        let mut dividing = false;
        let mut rest = trimmed;

        loop {
            let atom_len = rest
                .char_indices()
                .find(|&(i, c)| is_operator(c) || (i > 0 && is_exponent_start(c)))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            if atom_len == 0 {
                return Err(UnitParseError::Malformed(expr.to_string()));
            }
            let atom = &rest[..atom_len];
            let (atom_factor, atom_offset, atom_dims) = lookup_atom(atom)
                .ok_or_else(|| UnitParseError::UnknownSymbol(atom.to_string()))?;
            rest = &rest[atom_len..];

            let mut exponent = 1;
            if rest.starts_with(is_exponent_start) {
                let (e, r) = read_exponent(rest, expr)?;
                exponent = e;
                rest = r;
            }
            if dividing {
                exponent = -exponent;
            }

            let dim_exponent = i8::try_from(exponent)
                .map_err(|_| UnitParseError::Malformed(expr.to_string()))?;
            factor *= atom_factor.powi(exponent);
            for (d, a) in dims.iter_mut().zip(atom_dims) {
                *d = d.saturating_add(a.saturating_mul(dim_exponent));
            }
            offset = atom_offset;
            terms += 1;
            if exponent != 1 {
                terms += 1;
            }

            let after = rest.trim_start_matches(' ');
            let spaced = after.len() != rest.len();
            let Some(op) = after.chars().next() else {
                break;
            };
            if matches!(op, '*' | '·' | '⋅' | '/') {
                dividing = op == '/';
                rest = after[op.len_utf8()..].trim_start_matches(' ');
            } else if spaced {
                // "N m": whitespace multiplies
                dividing = false;
                rest = after;
            } else {
                return Err(UnitParseError::Malformed(expr.to_string()));
            }
            if rest.is_empty() {
                return Err(UnitParseError::Malformed(expr.to_string()));
            }
        }

        // Absolute scales (°C, °F) only apply to a bare temperature unit;
        // inside compound units they act as intervals.
        if terms > 1 {
            offset = 0.0;
        }

        Ok(Unit {
            factor,
            offset,
            dims,
        })
    }
}

impl Unit {
    /// Converts `magnitude` expressed in `self` into `target`. `None` when the
    /// dimensions differ.
    pub fn convert(&self, magnitude: f64, target: &Unit) -> Option<f64> {
        if self.dims != target.dims {
            return None;
        }
        let si = magnitude * self.factor + self.offset;
        Some((si - target.offset) / target.factor)
    }
}

/// Total ordering over magnitudes: NaN sorts below every number, NaN == NaN.
fn compare_magnitudes(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(o) => o,
        None => b.is_nan().cmp(&a.is_nan()),
    }
}

/// Compares `magnitude1 unit1` with `magnitude2 unit2`.
///
/// When `unit1` cannot be parsed the first value counts as greater (so it is
/// superseded as a minimum); when `unit2` cannot be parsed, or the units are
/// not convertible, the first value counts as smaller.
pub fn compare(magnitude1: f64, unit1: &str, magnitude2: f64, unit2: &str) -> Ordering {
    if unit1 == unit2 {
        return compare_magnitudes(magnitude1, magnitude2);
    }
    let Ok(parsed1) = unit1.parse::<Unit>() else {
        return Ordering::Greater;
    };
    let Ok(parsed2) = unit2.parse::<Unit>() else {
        return Ordering::Less;
    };
    match parsed2.convert(magnitude2, &parsed1) {
        Some(converted) => compare_magnitudes(magnitude1, converted),
        None => Ordering::Less,
    }
}

/// Adds `magnitude2 unit2` to `magnitude1 unit1`, returning the sum in `unit1`.
pub fn add(magnitude1: f64, unit1: &str, magnitude2: f64, unit2: &str) -> Option<f64> {
    if unit1 == unit2 {
        return Some(magnitude1 + magnitude2);
    }
    let parsed1 = unit1.parse::<Unit>().ok()?;
    let parsed2 = unit2.parse::<Unit>().ok()?;
    parsed2
        .convert(magnitude2, &parsed1)
        .map(|converted| magnitude1 + converted)
}
