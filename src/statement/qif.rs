//! QIF statement parsing
//!
//! QIF records are groups of single-letter tagged lines terminated by `^`:
//! `D` date, `T`/`U` amount, `P` payee, `M` memo, `N` number. A leading
//! `!Type:` header line is skipped.

use bigdecimal::BigDecimal;

use super::{parse_flexible_date, ParseOutcome, ParsedLine};

#[derive(Default)]
struct Record {
    date: Option<String>,
    amount: Option<String>,
    payee: Option<String>,
    memo: Option<String>,
    number: Option<String>,
    seen_any: bool,
}

pub fn parse(content: &str) -> ParseOutcome {
    let mut lines = Vec::new();
    let mut record = Record::default();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('!') {
            continue;
        }
        if line == "^" {
            if record.seen_any {
                match finish_record(std::mem::take(&mut record)) {
                    Ok(parsed) => lines.push(parsed),
                    Err(reason) => return ParseOutcome::partial(lines, reason),
                }
            }
            continue;
        }
        record.seen_any = true;
        let (tag, value) = line.split_at(1);
        let value = value.trim().to_string();
        match tag {
            "D" => record.date = Some(value),
            "T" | "U" => record.amount = Some(value),
            "P" => record.payee = Some(value),
            "M" => record.memo = Some(value),
            "N" => record.number = Some(value),
            // Category, address, and cleared-status tags are not imported
            _ => {}
        }
    }

    // Trailing record without a ^ terminator
    if record.seen_any {
        match finish_record(record) {
            Ok(parsed) => lines.push(parsed),
            Err(reason) => return ParseOutcome::partial(lines, reason),
        }
    }

    if lines.is_empty() {
        return ParseOutcome::failed("No transaction records found in QIF file".to_string());
    }
    ParseOutcome::ok(lines)
}

fn finish_record(record: Record) -> Result<ParsedLine, String> {
    let raw_date = record.date.ok_or("QIF record missing D (date) line")?;
    // Older exports write years as 'YY with an apostrophe separator
    let normalized = raw_date.replace('\'', "/");
    let transaction_date = parse_flexible_date(&normalized)
        .ok_or_else(|| format!("Unable to parse QIF date: {raw_date:?}"))?;

    let raw_amount = record.amount.ok_or("QIF record missing T (amount) line")?;
    let amount = super::csv::parse_decimal(&raw_amount)?;
    if amount == BigDecimal::from(0) {
        return Err("Amount cannot be zero".to_string());
    }

    let description = match (record.payee, record.memo) {
        (Some(payee), Some(memo)) if !memo.is_empty() => format!("{payee} - {memo}"),
        (Some(payee), _) => payee,
        (None, Some(memo)) if !memo.is_empty() => memo,
        _ => "Transaction".to_string(),
    };

    Ok(ParsedLine {
        transaction_date,
        value_date: None,
        description,
        reference: record.number.filter(|n| !n.is_empty()),
        amount,
        balance_after: None,
    })
}
