//! CSV statement parsing with header-driven column mapping
//!
//! Banks disagree on header names and on how amounts are signed: some
//! export one signed amount column, others split unsigned debit and credit
//! columns. Both layouts are supported; columns are located by probing the
//! header row against a synonym table.

use bigdecimal::BigDecimal;

use super::{parse_flexible_date, ParseOutcome, ParsedLine};

const DATE_HEADERS: &[&str] = &[
    "date",
    "transaction date",
    "transaction_date",
    "posted date",
    "posted_date",
];
const VALUE_DATE_HEADERS: &[&str] = &["value date", "value_date"];
const DESCRIPTION_HEADERS: &[&str] = &[
    "description",
    "memo",
    "details",
    "narrative",
    "transaction description",
];
const AMOUNT_HEADERS: &[&str] = &["amount", "transaction amount", "value"];
const DEBIT_HEADERS: &[&str] = &["debit", "debit amount", "withdrawal", "money out"];
const CREDIT_HEADERS: &[&str] = &["credit", "credit amount", "deposit", "money in"];
const BALANCE_HEADERS: &[&str] = &["balance", "running balance", "account balance", "balance_after"];
const REFERENCE_HEADERS: &[&str] = &[
    "reference",
    "reference number",
    "ref",
    "transaction id",
    "transaction_id",
    "fitid",
];

/// How the amount is encoded in this file
enum AmountColumns {
    /// One signed column
    Signed(usize),
    /// Unsigned debit and credit columns; amount = credit - debit
    DebitCredit { debit: usize, credit: usize },
}

struct ColumnMap {
    date: usize,
    value_date: Option<usize>,
    description: usize,
    amount: AmountColumns,
    balance: Option<usize>,
    reference: Option<usize>,
}

pub fn parse(content: &str) -> ParseOutcome {
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(headers) => headers.iter().map(|h| h.trim().to_lowercase()).collect(),
        Err(e) => return ParseOutcome::failed(format!("Cannot read CSV header row: {e}")),
    };

    let map = match detect_columns(&headers) {
        Ok(map) => map,
        Err(reason) => return ParseOutcome::failed(reason),
    };

    let mut lines = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row = index + 2; // 1-based, after the header row
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                return ParseOutcome::partial(lines, format!("Malformed CSV row {row}: {e}"))
            }
        };
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        match parse_record(&record, &map) {
            Ok(line) => lines.push(line),
            Err(reason) => return ParseOutcome::partial(lines, format!("Row {row}: {reason}")),
        }
    }

    if lines.is_empty() {
        return ParseOutcome::failed("No transaction lines found in CSV file".to_string());
    }
    ParseOutcome::ok(lines)
}

fn detect_columns(headers: &[String]) -> Result<ColumnMap, String> {
    let find = |synonyms: &[&str]| -> Option<usize> {
        synonyms
            .iter()
            .find_map(|name| headers.iter().position(|h| h == name))
    };

    let date = find(DATE_HEADERS).ok_or("Required column not found: date")?;
    let description = find(DESCRIPTION_HEADERS).ok_or("Required column not found: description")?;

    let amount = if let Some(signed) = find(AMOUNT_HEADERS) {
        AmountColumns::Signed(signed)
    } else {
        match (find(DEBIT_HEADERS), find(CREDIT_HEADERS)) {
            (Some(debit), Some(credit)) => AmountColumns::DebitCredit { debit, credit },
            _ => {
                return Err(
                    "Required column not found: amount (or a debit/credit pair)".to_string()
                )
            }
        }
    };

    Ok(ColumnMap {
        date,
        value_date: find(VALUE_DATE_HEADERS),
        description,
        amount,
        balance: find(BALANCE_HEADERS),
        reference: find(REFERENCE_HEADERS),
    })
}

fn parse_record(record: &::csv::StringRecord, map: &ColumnMap) -> Result<ParsedLine, String> {
    let field = |index: usize| record.get(index).unwrap_or("").trim();

    let transaction_date = parse_flexible_date(field(map.date))
        .ok_or_else(|| format!("Unable to parse date: {:?}", field(map.date)))?;
    let value_date = map
        .value_date
        .map(|i| field(i))
        .filter(|v| !v.is_empty())
        .and_then(parse_flexible_date);

    let description = field(map.description).to_string();
    if description.is_empty() {
        return Err("Description cannot be empty".to_string());
    }

    let amount = match map.amount {
        AmountColumns::Signed(i) => parse_decimal(field(i))?,
        AmountColumns::DebitCredit { debit, credit } => {
            let debit = parse_optional_decimal(field(debit))?.unwrap_or_else(|| 0.into());
            let credit = parse_optional_decimal(field(credit))?.unwrap_or_else(|| 0.into());
            &credit - &debit.abs()
        }
    };
    if amount == BigDecimal::from(0) {
        return Err("Amount cannot be zero".to_string());
    }

    // A missing balance column yields None for every line, never zero
    let balance_after = match map.balance {
        Some(i) => parse_optional_decimal(field(i))?,
        None => None,
    };

    let reference = map
        .reference
        .map(|i| field(i).to_string())
        .filter(|r| !r.is_empty());

    Ok(ParsedLine {
        transaction_date,
        value_date,
        description,
        reference,
        amount,
        balance_after,
    })
}

/// Parse a monetary field, stripping currency symbols, commas, and spaces
pub(super) fn parse_decimal(raw: &str) -> Result<BigDecimal, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "." {
        return Err(format!("Invalid amount: {raw:?}"));
    }
    cleaned
        .parse::<BigDecimal>()
        .map_err(|_| format!("Invalid amount: {raw:?}"))
}

fn parse_optional_decimal(raw: &str) -> Result<Option<BigDecimal>, String> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_decimal(raw).map(Some)
}
