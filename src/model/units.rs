//! Physical units — runtime parsing, normalization and dimensional algebra.
//!
//! Units are parsed from the strings stored next to each field in a sweep
//! file (`"USD/m**3"`, `"kg/s"`, `"bar"`). A parsed [`Unit`] keeps the named
//! terms it was built from (so derived units render back as readable
//! symbols), a scale to coherent SI, and the exponents of eight base
//! dimensions. Currency is its own base dimension.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;

use crate::{Error, Result};

// ============================================================================
// Dimension
// ============================================================================

/// Number of base dimensions tracked.
pub const BASE_DIMENSIONS: usize = 8;

const DIM_NAMES: [&str; BASE_DIMENSIONS] =
    ["length", "mass", "time", "current", "temperature", "amount", "luminosity", "currency"];

const EXPONENT_TOLERANCE: f64 = 1e-9;

/// Exponents of the base dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dimension([f64; BASE_DIMENSIONS]);

impl Dimension {
    pub const NONE: Dimension = Dimension([0.0; BASE_DIMENSIONS]);

    const fn base(index: usize) -> Self {
        let mut d = [0.0; BASE_DIMENSIONS];
        d[index] = 1.0;
        Dimension(d)
    }

    pub const LENGTH: Dimension = Dimension::base(0);
    pub const MASS: Dimension = Dimension::base(1);
    pub const TIME: Dimension = Dimension::base(2);
    pub const CURRENT: Dimension = Dimension::base(3);
    pub const TEMPERATURE: Dimension = Dimension::base(4);
    pub const AMOUNT: Dimension = Dimension::base(5);
    pub const LUMINOSITY: Dimension = Dimension::base(6);
    pub const CURRENCY: Dimension = Dimension::base(7);

    pub fn mul(self, other: Dimension) -> Dimension {
        let mut d = self.0;
        for (a, b) in d.iter_mut().zip(other.0) { *a += b; }
        Dimension(d)
    }

    pub fn powf(self, p: f64) -> Dimension {
        let mut d = self.0;
        for a in d.iter_mut() { *a *= p; }
        Dimension(d)
    }

    pub fn is_none(&self) -> bool {
        self.0.iter().all(|e| e.abs() < EXPONENT_TOLERANCE)
    }

    pub fn approx_eq(&self, other: &Dimension) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| (a - b).abs() < EXPONENT_TOLERANCE)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "dimensionless");
        }
        let parts: Vec<String> = self.0.iter()
            .zip(DIM_NAMES)
            .filter(|(e, _)| e.abs() >= EXPONENT_TOLERANCE)
            .map(|(e, name)| if (e - 1.0).abs() < EXPONENT_TOLERANCE {
                name.to_string()
            } else {
                format!("{name}^{}", format_exponent(*e))
            })
            .collect();
        write!(f, "{}", parts.join("·"))
    }
}

// ============================================================================
// Unit definitions (built-in table + runtime registry)
// ============================================================================

/// Definition of a named unit in coherent SI terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitDef {
    pub scale: f64,
    pub offset: f64,
    pub dimension: Dimension,
}

impl UnitDef {
    const fn new(scale: f64, dimension: Dimension) -> Self {
        Self { scale, offset: 0.0, dimension }
    }
}

fn builtin(symbol: &str) -> Option<UnitDef> {
    use Dimension as D;
    let l3 = D::LENGTH.powf(3.0);
    let force = D::MASS.mul(D::LENGTH).mul(D::TIME.powf(-2.0));
    let pressure = force.mul(D::LENGTH.powf(-2.0));
    let energy = force.mul(D::LENGTH);
    let power = energy.mul(D::TIME.powf(-1.0));
    let def = match symbol {
        "dimensionless" | "1" => UnitDef::new(1.0, D::NONE),
        "%" | "percent" => UnitDef::new(0.01, D::NONE),
        "ppm" => UnitDef::new(1e-6, D::NONE),
        "fraction" => UnitDef::new(1.0, D::NONE),
        // length
        "m" | "meter" | "metre" => UnitDef::new(1.0, D::LENGTH),
        "km" => UnitDef::new(1e3, D::LENGTH),
        "cm" => UnitDef::new(1e-2, D::LENGTH),
        "mm" => UnitDef::new(1e-3, D::LENGTH),
        "um" | "µm" | "micron" => UnitDef::new(1e-6, D::LENGTH),
        "nm" => UnitDef::new(1e-9, D::LENGTH),
        "ft" | "foot" => UnitDef::new(0.3048, D::LENGTH),
        "inch" | "in" => UnitDef::new(0.0254, D::LENGTH),
        // mass
        "kg" => UnitDef::new(1.0, D::MASS),
        "g" | "gram" => UnitDef::new(1e-3, D::MASS),
        "mg" => UnitDef::new(1e-6, D::MASS),
        "ug" | "µg" => UnitDef::new(1e-9, D::MASS),
        "t" | "tonne" | "metric_ton" => UnitDef::new(1e3, D::MASS),
        "lb" | "pound" => UnitDef::new(0.453_592_37, D::MASS),
        // time
        "s" | "second" => UnitDef::new(1.0, D::TIME),
        "ms" => UnitDef::new(1e-3, D::TIME),
        "min" | "minute" => UnitDef::new(60.0, D::TIME),
        "h" | "hr" | "hour" => UnitDef::new(3600.0, D::TIME),
        "day" | "d" => UnitDef::new(86_400.0, D::TIME),
        "week" => UnitDef::new(604_800.0, D::TIME),
        "year" | "yr" | "a" => UnitDef::new(31_557_600.0, D::TIME),
        // volume
        "L" | "l" | "liter" | "litre" => UnitDef::new(1e-3, l3),
        "mL" | "ml" => UnitDef::new(1e-6, l3),
        "gallon" | "US_liquid_gallon" => UnitDef::new(3.785_411_784e-3, l3),
        // force, pressure
        "N" => UnitDef::new(1.0, force),
        "kN" => UnitDef::new(1e3, force),
        "Pa" => UnitDef::new(1.0, pressure),
        "kPa" => UnitDef::new(1e3, pressure),
        "MPa" => UnitDef::new(1e6, pressure),
        "bar" => UnitDef::new(1e5, pressure),
        "mbar" => UnitDef::new(1e2, pressure),
        "atm" => UnitDef::new(101_325.0, pressure),
        "psi" => UnitDef::new(6_894.757_293_168, pressure),
        // energy, power
        "J" => UnitDef::new(1.0, energy),
        "kJ" => UnitDef::new(1e3, energy),
        "MJ" => UnitDef::new(1e6, energy),
        "GJ" => UnitDef::new(1e9, energy),
        "Wh" => UnitDef::new(3600.0, energy),
        "kWh" => UnitDef::new(3.6e6, energy),
        "MWh" => UnitDef::new(3.6e9, energy),
        "W" => UnitDef::new(1.0, power),
        "kW" => UnitDef::new(1e3, power),
        "MW" => UnitDef::new(1e6, power),
        "GW" => UnitDef::new(1e9, power),
        // electrical
        "A" => UnitDef::new(1.0, D::CURRENT),
        "mA" => UnitDef::new(1e-3, D::CURRENT),
        "V" => UnitDef::new(1.0, power.mul(D::CURRENT.powf(-1.0))),
        // amount
        "mol" => UnitDef::new(1.0, D::AMOUNT),
        "mmol" => UnitDef::new(1e-3, D::AMOUNT),
        "kmol" => UnitDef::new(1e3, D::AMOUNT),
        // temperature
        "K" | "kelvin" => UnitDef::new(1.0, D::TEMPERATURE),
        "degC" | "celsius" => UnitDef { scale: 1.0, offset: 273.15, dimension: D::TEMPERATURE },
        "degF" | "fahrenheit" => UnitDef { scale: 5.0 / 9.0, offset: 255.372_222_222_222_2, dimension: D::TEMPERATURE },
        // luminosity
        "cd" => UnitDef::new(1.0, D::LUMINOSITY),
        _ => return None,
    };
    Some(def)
}

/// Process-wide custom units (currency and concentration by default).
static CUSTOM_UNITS: LazyLock<RwLock<HashMap<String, UnitDef>>> = LazyLock::new(|| {
    let mut units = HashMap::new();
    units.insert("USD".to_string(), UnitDef::new(1.0, Dimension::CURRENCY));
    units.insert(
        "PPM".to_string(),
        UnitDef::new(1e-3, Dimension::MASS.mul(Dimension::LENGTH.powf(-3.0))),
    );
    RwLock::new(units)
});

fn lookup(symbol: &str) -> Option<UnitDef> {
    if let Some(def) = CUSTOM_UNITS.read().get(symbol) {
        return Some(*def);
    }
    builtin(symbol)
}

/// Register a custom unit defined by a unit expression over known units.
///
/// ```
/// sweepstore::model::units::register_unit("MGD", "1e6*gallon/day").unwrap();
/// let mgd = sweepstore::model::Unit::parse("MGD").unwrap();
/// let m3_day = sweepstore::model::Unit::parse("m**3/day").unwrap();
/// assert!(mgd.is_compatible(&m3_day));
/// ```
pub fn register_unit(symbol: &str, definition: &str) -> Result<()> {
    let unit = Unit::parse(definition)?;
    let def = UnitDef { scale: unit.scale, offset: 0.0, dimension: unit.dimension };
    CUSTOM_UNITS.write().insert(symbol.to_string(), def);
    tracing::debug!(symbol, definition, "registered custom unit");
    Ok(())
}

/// Whether `symbol` resolves to a known unit.
pub fn is_known_unit(symbol: &str) -> bool {
    lookup(symbol).is_some()
}

// ============================================================================
// Unit
// ============================================================================

/// A parsed physical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    /// Named factors with exponents, in first-seen order.
    terms: Vec<(String, f64)>,
    scale: f64,
    offset: f64,
    dimension: Dimension,
}

/// Linear (or affine, for temperatures) map between two compatible units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub factor: f64,
    pub shift: f64,
}

impl Conversion {
    pub fn apply(&self, v: f64) -> f64 {
        v * self.factor + self.shift
    }

    pub fn is_identity(&self) -> bool {
        self.factor == 1.0 && self.shift == 0.0
    }
}

impl Unit {
    pub fn dimensionless() -> Self {
        Self { terms: Vec::new(), scale: 1.0, offset: 0.0, dimension: Dimension::NONE }
    }

    fn named(symbol: &str, def: UnitDef) -> Self {
        let terms = if symbol == "dimensionless" || symbol == "1" {
            Vec::new()
        } else {
            vec![(symbol.to_string(), 1.0)]
        };
        Self { terms, scale: def.scale, offset: def.offset, dimension: def.dimension }
    }

    /// Parse a unit expression verbatim (no source normalization).
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = UnitParser { tokens: &tokens, pos: 0, text };
        if parser.at_end() {
            return Ok(Unit::dimensionless());
        }
        let unit = parser.parse_product()?;
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(unit)
    }

    /// Normalize a unit string as written by sweep tools, then parse it.
    ///
    /// Never fails: unparseable units fall back to dimensionless.
    pub fn from_source(raw: Option<&str>) -> SourceUnit {
        let normalized = normalize_unit_str(raw);
        let unit = match Unit::parse(&normalized.text) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(units = %normalized.text, error = %e, "unrecognised units, using dimensionless");
                Unit::dimensionless()
            }
        };
        SourceUnit { unit, iso_time: normalized.iso_time }
    }

    pub fn scale(&self) -> f64 { self.scale }
    pub fn dimension(&self) -> Dimension { self.dimension }

    /// No base dimensions (a plain number, possibly scaled like `%`).
    pub fn is_dimensionless(&self) -> bool {
        self.dimension.is_none()
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension.approx_eq(&other.dimension)
    }

    /// Affine units only shift when they stand alone (`degC`, not `J/degC`).
    fn affine_offset(&self) -> f64 {
        match self.terms.as_slice() {
            [(_, e)] if (e - 1.0).abs() < EXPONENT_TOLERANCE => self.offset,
            _ => 0.0,
        }
    }

    /// Conversion of magnitudes in `self` to magnitudes in `target`.
    pub fn conversion_to(&self, target: &Unit) -> Result<Conversion> {
        if !self.is_compatible(target) {
            return Err(Error::IncompatibleUnits {
                from: self.symbol(),
                to: target.symbol(),
            });
        }
        let factor = self.scale / target.scale;
        let shift = (self.affine_offset() - target.affine_offset()) / target.scale;
        Ok(Conversion { factor, shift })
    }

    pub fn mul(&self, other: &Unit) -> Unit {
        let mut terms = self.terms.clone();
        for (sym, e) in &other.terms {
            merge_term(&mut terms, sym, *e);
        }
        Unit {
            terms,
            scale: self.scale * other.scale,
            offset: 0.0,
            dimension: self.dimension.mul(other.dimension),
        }
    }

    pub fn div(&self, other: &Unit) -> Unit {
        self.mul(&other.powf(-1.0))
    }

    pub fn powf(&self, p: f64) -> Unit {
        let mut terms: Vec<(String, f64)> = self.terms.iter().map(|(s, e)| (s.clone(), e * p)).collect();
        terms.retain(|(_, e)| e.abs() >= EXPONENT_TOLERANCE);
        Unit {
            terms,
            scale: self.scale.powf(p),
            offset: if (p - 1.0).abs() < EXPONENT_TOLERANCE { self.offset } else { 0.0 },
            dimension: self.dimension.powf(p),
        }
    }

    /// Normalized symbol, e.g. `USD/m**3`.
    pub fn symbol(&self) -> String {
        let num: Vec<String> = self.terms.iter()
            .filter(|(_, e)| *e > 0.0)
            .map(|(s, e)| render_term(s, *e))
            .collect();
        let den: Vec<String> = self.terms.iter()
            .filter(|(_, e)| *e < 0.0)
            .map(|(s, e)| render_term(s, -*e))
            .collect();
        match (num.is_empty(), den.is_empty()) {
            (true, true) => "dimensionless".to_string(),
            (false, true) => num.join("*"),
            (true, false) => format!("1/{}", den.join("/")),
            (false, false) => format!("{}/{}", num.join("*"), den.join("/")),
        }
    }

    /// Label for plot axes: `$m^3$/h`, `$` for currency, `-` for dimensionless.
    pub fn label(&self) -> String {
        let symbol = self.symbol();
        if symbol == "dimensionless" {
            return "-".to_string();
        }
        if !symbol.contains("**") && !symbol.contains("USD") {
            return symbol;
        }
        symbol.split('/')
            .map(|part| {
                if part.contains("USD") {
                    "$\\$$".to_string()
                } else if part.contains("**") {
                    format!("${}$", part.replace("**", "^"))
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Default for Unit {
    fn default() -> Self { Unit::dimensionless() }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

fn merge_term(terms: &mut Vec<(String, f64)>, symbol: &str, exponent: f64) {
    if let Some(pos) = terms.iter().position(|(s, _)| s == symbol) {
        terms[pos].1 += exponent;
        if terms[pos].1.abs() < EXPONENT_TOLERANCE {
            terms.remove(pos);
        }
    } else if exponent.abs() >= EXPONENT_TOLERANCE {
        terms.push((symbol.to_string(), exponent));
    }
}

fn render_term(symbol: &str, exponent: f64) -> String {
    if (exponent - 1.0).abs() < EXPONENT_TOLERANCE {
        symbol.to_string()
    } else {
        format!("{symbol}**{}", format_exponent(exponent))
    }
}

fn format_exponent(e: f64) -> String {
    if (e - e.round()).abs() < EXPONENT_TOLERANCE {
        format!("{}", e.round() as i64)
    } else {
        format!("{e}")
    }
}

// ============================================================================
// Source-string normalization
// ============================================================================

/// Result of normalizing a unit string read from a sweep file.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUnit {
    pub text: String,
    /// The values are ISO-8601 timestamps to be converted to epoch minutes.
    pub iso_time: bool,
}

/// Parsed unit plus normalization flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub unit: Unit,
    pub iso_time: bool,
}

/// Rewrite unit spellings used by flowsheet tools into parseable symbols.
pub fn normalize_unit_str(raw: Option<&str>) -> NormalizedUnit {
    let Some(raw) = raw.map(str::trim) else {
        return NormalizedUnit { text: "dimensionless".into(), iso_time: false };
    };
    if raw.is_empty() || raw == "-" || raw == "None" {
        return NormalizedUnit { text: "dimensionless".into(), iso_time: false };
    }
    let mut units = raw.to_string();
    let mut iso_time = false;
    if units.contains("isotime") {
        units = "min".to_string();
        iso_time = true;
    }
    if units.contains("USD") {
        units = units.split('/')
            .map(|part| if part.contains("USD") { "USD" } else { part })
            .collect::<Vec<_>>()
            .join("/");
    }
    if units.contains("USD/a") {
        units = units.replace("USD/a", "USD/year");
    }
    if units.starts_with("1/a") {
        units = units.replacen("1/a", "1/year", 1);
    }
    if units.contains("PSI") {
        units = units.replace("PSI", "psi");
    }
    if units.contains("gpm") {
        units = units.replace("gpm", "gallon/min");
    }
    if units.contains("gal") && !units.contains("gallon") {
        units = units.replace("gal", "gallon");
    }
    if units.contains("°C") {
        units = units.replace(" °C", "*degC").replace("°C", "degC");
    }
    if units.contains("liter") {
        units = units.replace("liter", "L");
    }
    if units.contains("sec") && !units.contains("second") {
        units = units.replace("sec", "s");
    }
    NormalizedUnit { text: units, iso_time }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Star,
    Slash,
    Pow,
    Minus,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '%' | '°' | 'µ' | '$')
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }
            '*' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '*'))) {
                    chars.next();
                    tokens.push(Token { tok: Tok::Pow, pos });
                } else {
                    tokens.push(Token { tok: Tok::Star, pos });
                }
            }
            '^' => { chars.next(); tokens.push(Token { tok: Tok::Pow, pos }); }
            '/' => { chars.next(); tokens.push(Token { tok: Tok::Slash, pos }); }
            '-' => { chars.next(); tokens.push(Token { tok: Tok::Minus, pos }); }
            '(' => { chars.next(); tokens.push(Token { tok: Tok::LParen, pos }); }
            ')' => { chars.next(); tokens.push(Token { tok: Tok::RParen, pos }); }
            c if c.is_ascii_digit() || c == '.' => {
                let mut num = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    let exp_sign = (c == '-' || c == '+') && num.ends_with(['e', 'E']);
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exp_sign {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num.parse::<f64>().map_err(|_| Error::UnitParse {
                    units: input.to_string(),
                    position: pos,
                    message: format!("invalid number '{num}'"),
                })?;
                tokens.push(Token { tok: Tok::Number(value), pos });
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if is_ident_char(c) {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token { tok: Tok::Ident(ident), pos });
            }
            other => {
                return Err(Error::UnitParse {
                    units: input.to_string(),
                    position: pos,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// product  := power (('*' | '/') power)*
/// power    := primary (POW exponent)?
/// primary  := IDENT | NUMBER | '(' product ')'
/// exponent := '-'? NUMBER | '(' '-'? NUMBER ('/' NUMBER)? ')'
struct UnitParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    text: &'t str,
}

impl<'t> UnitParser<'t> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn advance(&mut self) -> Option<&Tok> {
        let tok = self.tokens.get(self.pos).map(|t| &t.tok);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> Error {
        let position = self.tokens.get(self.pos).map_or(self.text.len(), |t| t.pos);
        Error::UnitParse {
            units: self.text.to_string(),
            position,
            message: message.to_string(),
        }
    }

    fn parse_product(&mut self) -> Result<Unit> {
        let mut unit = self.parse_power()?;
        loop {
            if self.eat(&Tok::Star) {
                unit = unit.mul(&self.parse_power()?);
            } else if self.eat(&Tok::Slash) {
                unit = unit.div(&self.parse_power()?);
            } else {
                return Ok(unit);
            }
        }
    }

    fn parse_power(&mut self) -> Result<Unit> {
        let base = self.parse_primary()?;
        if self.eat(&Tok::Pow) {
            let p = self.parse_exponent()?;
            Ok(base.powf(p))
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Unit> {
        let start = self.pos;
        match self.advance().cloned() {
            Some(Tok::Ident(symbol)) => match lookup(&symbol) {
                Some(def) => Ok(Unit::named(&symbol, def)),
                None => {
                    self.pos = start;
                    Err(self.error(&format!("unknown unit '{symbol}'")))
                }
            },
            Some(Tok::Number(v)) => {
                if v == 1.0 {
                    Ok(Unit::dimensionless())
                } else {
                    let mut unit = Unit::dimensionless();
                    unit.scale = v;
                    unit.terms.push((format_number(v), 1.0));
                    Ok(unit)
                }
            }
            Some(Tok::LParen) => {
                let unit = self.parse_product()?;
                if !self.eat(&Tok::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(unit)
            }
            _ => {
                self.pos = start;
                Err(self.error("expected a unit"))
            }
        }
    }

    fn parse_exponent(&mut self) -> Result<f64> {
        let parenthesized = self.eat(&Tok::LParen);
        let negative = self.eat(&Tok::Minus);
        let mut value = match self.advance().cloned() {
            Some(Tok::Number(v)) => v,
            _ => return Err(self.error("expected an exponent")),
        };
        if parenthesized {
            if self.eat(&Tok::Slash) {
                match self.advance().cloned() {
                    Some(Tok::Number(d)) if d != 0.0 => value /= d,
                    _ => return Err(self.error("expected a denominator")),
                }
            }
            if !self.eat(&Tok::RParen) {
                return Err(self.error("expected ')'"));
            }
        }
        Ok(if negative { -value } else { value })
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
