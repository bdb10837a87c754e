use crate::error::{CalcGraphError, CalcGraphResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

//==============================================================================
// Addresses
//==============================================================================

/// Spreadsheet columns top out at XFD.
const MAX_COLUMN_LETTERS: usize = 3;

/// A 1-based (column, row) pair, displayed as `A1`, `AB12`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub column: u32,
    pub row: u32,
}

impl CellAddress {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }

    /// Column number → letters (1 → A, 27 → AA)
    pub fn column_letters(column: u32) -> String {
        let mut letters = Vec::new();
        let mut n = column;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        letters.iter().rev().collect()
    }

    /// Letters → column number (A → 1, AA → 27). Case-insensitive.
    pub fn column_number(letters: &str) -> Option<u32> {
        if letters.is_empty() || letters.len() > MAX_COLUMN_LETTERS {
            return None;
        }
        letters.chars().try_fold(0u32, |acc, c| {
            c.is_ascii_alphabetic()
                .then(|| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1))
        })
    }

    /// The cell one column to the right
    pub fn right(&self) -> Self {
        Self::new(self.column + 1, self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::column_letters(self.column), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = CalcGraphError;

    /// Parse `A1`, `$A$1`, `ab12`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalcGraphError::InvalidAddress(s.to_string());
        let body = s.trim().strip_prefix('$').unwrap_or(s.trim());
        let split = body
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (letters, rest) = body.split_at(split);
        let digits = rest.strip_prefix('$').unwrap_or(rest);

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let column = Self::column_number(letters).ok_or_else(invalid)?;
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(Self::new(column, row))
    }
}

/// Sheet name scoping cell addresses inside one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(String);

impl SheetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one independently loaded document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-qualified cell: `<document>#<sheet>!<cell>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedAddress {
    pub document: DocumentId,
    pub sheet: SheetId,
    pub cell: CellAddress,
}

impl QualifiedAddress {
    pub fn new(document: DocumentId, sheet: SheetId, cell: CellAddress) -> Self {
        Self {
            document,
            sheet,
            cell,
        }
    }
}

impl fmt::Display for QualifiedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}!{}", self.document, self.sheet, self.cell)
    }
}

impl FromStr for QualifiedAddress {
    type Err = CalcGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalcGraphError::InvalidAddress(s.to_string());
        let (document, rest) = s.split_once('#').ok_or_else(invalid)?;
        let (sheet, cell) = rest.rsplit_once('!').ok_or_else(invalid)?;
        if document.is_empty() || sheet.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(
            DocumentId::new(document),
            SheetId::new(sheet),
            cell.parse()?,
        ))
    }
}

impl Serialize for QualifiedAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QualifiedAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

//==============================================================================
// Formula references
//==============================================================================

/// A single-cell reference as written in a formula.
/// `sheet` is set for qualified references (`Sheet2!B6`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellReference {
    pub sheet: Option<String>,
    pub address: CellAddress,
}

impl CellReference {
    pub fn local(address: CellAddress) -> Self {
        Self {
            sheet: None,
            address,
        }
    }

    pub fn qualified(sheet: impl Into<String>, address: CellAddress) -> Self {
        Self {
            sheet: Some(sheet.into()),
            address,
        }
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}!{}", quote_sheet(sheet), self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// A rectangular range reference (`A1:B4`, `Loads!C2:C9`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeReference {
    pub sheet: Option<String>,
    pub start: CellAddress,
    pub end: CellAddress,
}

impl RangeReference {
    /// The two anchor cells of the range
    pub fn corners(&self) -> [CellReference; 2] {
        [
            CellReference {
                sheet: self.sheet.clone(),
                address: self.start,
            },
            CellReference {
                sheet: self.sheet.clone(),
                address: self.end,
            },
        ]
    }

    /// Whether `address` falls inside the rectangle, whichever way round the corners are
    pub fn contains(&self, address: &CellAddress) -> bool {
        let (c0, c1) = min_max(self.start.column, self.end.column);
        let (r0, r1) = min_max(self.start.row, self.end.row);
        (c0..=c1).contains(&address.column) && (r0..=r1).contains(&address.row)
    }
}

impl fmt::Display for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet(sheet))?;
        }
        write!(f, "{}:{}", self.start, self.end)
    }
}

fn min_max(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn quote_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

/// Arithmetic, concatenation and comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "^")]
    Pow,
    #[serde(rename = "&")]
    Concat,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            "^" => Operator::Pow,
            "&" => Operator::Concat,
            "=" => Operator::Eq,
            "<>" => Operator::Ne,
            "<" => Operator::Lt,
            ">" => Operator::Gt,
            "<=" => Operator::Le,
            ">=" => Operator::Ge,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "^",
            Operator::Concat => "&",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

//==============================================================================
// Cells and documents
//==============================================================================

/// A literal cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            Literal::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Literal::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Literal::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Text(s) => f.write_str(s),
            Literal::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl From<f64> for Literal {
    fn from(n: f64) -> Self {
        Literal::Number(n)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

/// One addressed cell after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub sheet: SheetId,
    pub address: CellAddress,
    pub value: Option<Literal>,
    pub formula: Option<String>,
}

impl Cell {
    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }
}

/// A cell as handed over by the workbook loader
#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    pub sheet_name: String,
    pub address: String,
    pub value: Option<Literal>,
    pub formula: Option<String>,
    pub is_formula_cell: bool,
}

impl RawCell {
    pub fn value(sheet: &str, address: &str, value: impl Into<Literal>) -> Self {
        Self {
            sheet_name: sheet.to_string(),
            address: address.to_string(),
            value: Some(value.into()),
            formula: None,
            is_formula_cell: false,
        }
    }

    pub fn formula(sheet: &str, address: &str, formula: &str) -> Self {
        Self {
            sheet_name: sheet.to_string(),
            address: address.to_string(),
            value: None,
            formula: Some(formula.to_string()),
            is_formula_cell: true,
        }
    }
}

/// An immutable, loaded document: declared sheets plus its cell enumeration
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    sheet_names: Vec<SheetId>,
    cells: Vec<Cell>,
    index: HashMap<(SheetId, CellAddress), usize>,
}

impl Document {
    /// Normalize a loader pass into a document.
    ///
    /// A cell is a formula cell when the loader flags it, when it carries raw
    /// formula text, or when its text value starts with `=`. Cells on sheets
    /// missing from `sheet_names` extend the declared list.
    pub fn from_raw(
        id: DocumentId,
        sheet_names: Vec<String>,
        raw_cells: Vec<RawCell>,
    ) -> CalcGraphResult<Self> {
        if id.as_str().is_empty() || id.as_str().contains('#') {
            return Err(CalcGraphError::Load(format!(
                "document id '{}' must be non-empty and must not contain '#'",
                id
            )));
        }

        let mut doc = Self {
            id,
            sheet_names: sheet_names.into_iter().map(SheetId::new).collect(),
            cells: Vec::with_capacity(raw_cells.len()),
            index: HashMap::new(),
        };

        for raw in raw_cells {
            let address: CellAddress = raw.address.parse()?;
            let sheet = SheetId::new(raw.sheet_name);
            if !doc.sheet_names.contains(&sheet) {
                tracing::warn!(sheet = %sheet, "cell on undeclared sheet, adding it");
                doc.sheet_names.push(sheet.clone());
            }

            let formula = match (raw.formula, &raw.value) {
                (Some(text), _) => Some(text),
                (None, Some(Literal::Text(text))) if raw.is_formula_cell || text.starts_with('=') => {
                    Some(text.clone())
                }
                _ => None,
            };
            let value = match (&formula, raw.value) {
                (Some(_), Some(Literal::Text(text))) if text.starts_with('=') => None,
                (_, value) => value,
            };

            let key = (sheet.clone(), address);
            if doc.index.contains_key(&key) {
                return Err(CalcGraphError::DuplicateCell {
                    sheet: sheet.to_string(),
                    address: address.to_string(),
                });
            }
            doc.index.insert(key, doc.cells.len());
            doc.cells.push(Cell {
                sheet,
                address,
                value,
                formula,
            });
        }

        Ok(doc)
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn sheet_names(&self) -> &[SheetId] {
        &self.sheet_names
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn formula_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.is_formula())
    }

    pub fn get(&self, sheet: &SheetId, address: &CellAddress) -> Option<&Cell> {
        self.index
            .get(&(sheet.clone(), *address))
            .map(|&i| &self.cells[i])
    }

    pub fn contains(&self, sheet: &SheetId, address: &CellAddress) -> bool {
        self.index.contains_key(&(sheet.clone(), *address))
    }

    /// Resolve a sheet name as written in a formula (case-insensitive)
    pub fn resolve_sheet(&self, name: &str) -> Option<&SheetId> {
        self.sheet_names
            .iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    pub fn qualify(&self, sheet: &SheetId, address: CellAddress) -> QualifiedAddress {
        QualifiedAddress::new(self.id.clone(), sheet.clone(), address)
    }

    /// Nearest text cell to the left on the same row (the row's label)
    pub fn label_for(&self, sheet: &SheetId, address: &CellAddress) -> Option<&str> {
        (1..address.column).rev().find_map(|column| {
            self.get(sheet, &CellAddress::new(column, address.row))
                .filter(|c| !c.is_formula())
                .and_then(|c| c.value.as_ref())
                .and_then(Literal::as_text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip() {
        assert_eq!(CellAddress::column_letters(1), "A");
        assert_eq!(CellAddress::column_letters(26), "Z");
        assert_eq!(CellAddress::column_letters(27), "AA");
        assert_eq!(CellAddress::column_letters(16384), "XFD");
        assert_eq!(CellAddress::column_number("XFD"), Some(16384));
        assert_eq!(CellAddress::column_number("aa"), Some(27));
    }

    #[test]
    fn test_parse_cell_address() {
        assert_eq!("B15".parse::<CellAddress>().unwrap(), CellAddress::new(2, 15));
        assert_eq!("$C$3".parse::<CellAddress>().unwrap(), CellAddress::new(3, 3));
        assert!("A0".parse::<CellAddress>().is_err());
        assert!("ABCD1".parse::<CellAddress>().is_err());
        assert!("12".parse::<CellAddress>().is_err());
        assert!("A".parse::<CellAddress>().is_err());
    }

    #[test]
    fn test_qualified_address_flat_key() {
        let addr: QualifiedAddress = "bridge#Load Calc!C7".parse().unwrap();
        assert_eq!(addr.document.as_str(), "bridge");
        assert_eq!(addr.sheet.as_str(), "Load Calc");
        assert_eq!(addr.cell, CellAddress::new(3, 7));
        assert_eq!(addr.to_string(), "bridge#Load Calc!C7");
    }

    #[test]
    fn test_range_contains_reversed_corners() {
        let range = RangeReference {
            sheet: None,
            start: CellAddress::new(3, 5),
            end: CellAddress::new(1, 1),
        };
        assert!(range.contains(&CellAddress::new(2, 3)));
        assert!(!range.contains(&CellAddress::new(4, 3)));
    }

    #[test]
    fn test_document_rejects_duplicate_cells() {
        let result = Document::from_raw(
            DocumentId::new("doc"),
            vec!["Sheet1".to_string()],
            vec![
                RawCell::value("Sheet1", "A1", 1.0),
                RawCell::value("Sheet1", "A1", 2.0),
            ],
        );
        assert!(matches!(result, Err(CalcGraphError::DuplicateCell { .. })));
    }

    #[test]
    fn test_document_detects_formula_text_values() {
        let doc = Document::from_raw(
            DocumentId::new("doc"),
            vec!["Sheet1".to_string()],
            vec![RawCell::value("Sheet1", "B4", "=B2*B3")],
        )
        .unwrap();
        let cell = &doc.cells()[0];
        assert_eq!(cell.formula.as_deref(), Some("=B2*B3"));
        assert_eq!(cell.value, None);
    }

    #[test]
    fn test_document_id_must_not_contain_hash() {
        let result = Document::from_raw(DocumentId::new("a#b"), vec![], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_label_for_finds_row_text() {
        let doc = Document::from_raw(
            DocumentId::new("doc"),
            vec!["Sheet1".to_string()],
            vec![
                RawCell::value("Sheet1", "A2", "Span length"),
                RawCell::value("Sheet1", "B2", 12.5),
                RawCell::formula("Sheet1", "C2", "=B2*2"),
            ],
        )
        .unwrap();
        let sheet = SheetId::new("Sheet1");
        assert_eq!(
            doc.label_for(&sheet, &CellAddress::new(3, 2)),
            Some("Span length")
        );
        assert_eq!(doc.resolve_sheet("sheet1"), Some(&sheet));
    }
}
