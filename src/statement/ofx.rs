//! OFX statement parsing
//!
//! OFX 1.x is SGML, not XML: tags frequently open without a matching close
//! (`<TRNAMT>-49.99`). Transactions are scanned as `STMTTRN` blocks and
//! field values taken as the text between a tag and the next `<`.

use chrono::NaiveDate;

use super::{ParseOutcome, ParsedLine};

pub fn parse(content: &str) -> ParseOutcome {
    let upper = content.to_ascii_uppercase();
    let mut lines = Vec::new();
    let mut cursor = 0;

    while let Some(start) = upper[cursor..].find("<STMTTRN>") {
        let block_start = cursor + start + "<STMTTRN>".len();
        let block_end = match upper[block_start..].find("</STMTTRN>") {
            Some(end) => block_start + end,
            None => {
                return ParseOutcome::partial(
                    lines,
                    "Unterminated STMTTRN block in OFX file".to_string(),
                )
            }
        };
        // Slice the original content so descriptions keep their casing
        let block = &content[block_start..block_end];
        match parse_transaction(block) {
            Ok(line) => lines.push(line),
            Err(reason) => {
                return ParseOutcome::partial(lines, format!("STMTTRN block: {reason}"))
            }
        }
        cursor = block_end + "</STMTTRN>".len();
    }

    if lines.is_empty() {
        return ParseOutcome::failed("No STMTTRN transactions found in OFX file".to_string());
    }
    ParseOutcome::ok(lines)
}

fn parse_transaction(block: &str) -> Result<ParsedLine, String> {
    let posted = tag_value(block, "DTPOSTED").ok_or("Missing DTPOSTED")?;
    let transaction_date = parse_ofx_date(&posted)?;
    let value_date = tag_value(block, "DTAVAIL").and_then(|raw| parse_ofx_date(&raw).ok());

    let raw_amount = tag_value(block, "TRNAMT").ok_or("Missing TRNAMT")?;
    let amount = super::csv::parse_decimal(&raw_amount)?;

    // MEMO preferred, NAME as fallback; OFX exports with neither still carry
    // a transaction worth importing
    let description = tag_value(block, "MEMO")
        .or_else(|| tag_value(block, "NAME"))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "Transaction".to_string());

    let reference = tag_value(block, "FITID").filter(|r| !r.is_empty());

    Ok(ParsedLine {
        transaction_date,
        value_date,
        description,
        reference,
        amount,
        // OFX does not carry a running balance per transaction
        balance_after: None,
    })
}

/// Value of `<TAG>` within a block: the text up to the next `<` or line end
fn tag_value(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let start = block.to_ascii_uppercase().find(&open)? + open.len();
    let rest = &block[start..];
    let end = rest
        .find('<')
        .or_else(|| rest.find('\n'))
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// OFX dates are `YYYYMMDD`, optionally followed by time and timezone
fn parse_ofx_date(raw: &str) -> Result<NaiveDate, String> {
    if raw.len() < 8 {
        return Err(format!("Unable to parse OFX date: {raw:?}"));
    }
    NaiveDate::parse_from_str(&raw[..8], "%Y%m%d")
        .map_err(|_| format!("Unable to parse OFX date: {raw:?}"))
}
