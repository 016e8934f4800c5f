// src/process/mod.rs
use csv::{Position, ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{btree_map::Entry, BTreeMap},
};
use tracing::{debug, info};

use crate::error::ParseError;

pub mod utils;

use utils::{parse_integer, parse_number};

/// Field delimiter of the income extracts.
pub const DELIMITER: u8 = b';';
/// Reporting period, e.g. `202504`.
pub const PERIOD_COLUMN: usize = 1;
/// Income amount recorded for the period.
pub const INCOME_COLUMN: usize = 2;
/// Customer identifier.
pub const CUSTOMER_COLUMN: usize = 12;
/// Minimum number of fields a row must carry.
pub const REQUIRED_COLUMNS: usize = CUSTOMER_COLUMN + 1;

/// The three fields of an input line the aggregation consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRow {
    pub period: i64,
    pub income: f64,
    pub customer_id: i64,
}

/// Latest period seen for a customer and the income summed over that period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregate {
    pub customer_id: i64,
    pub max_period: i64,
    pub total_income: f64,
}

/// Output of [`process_client_renta_data`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// One entry per customer, ascending by `customer_id`.
    pub customers: Vec<CustomerAggregate>,
    /// Number of data rows in the input.
    pub total_rows: usize,
    /// Number of distinct customer ids in the input.
    pub distinct_customers: usize,
}

/// Parse every non-blank line of `content` into a [`RawRow`].
///
/// There is no header row. Lines holding only whitespace are skipped. The first
/// line that is malformed, too short, or has a non-numeric value in one of the
/// consumed columns fails the whole input.
pub fn parse_rows(content: &str) -> Result<Vec<RawRow>, ParseError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut lines = LineCounter::new(content);

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|source| ParseError::Csv {
            line: lines.line_of(source.position()),
            source,
        })?;
        let line = lines.line_of(record.position());

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        if record.len() < REQUIRED_COLUMNS {
            return Err(ParseError::MissingColumns {
                line,
                found: record.len(),
                required: REQUIRED_COLUMNS,
            });
        }

        rows.push(RawRow {
            period: coerce(&record, line, PERIOD_COLUMN, "period", parse_integer)?,
            income: coerce(&record, line, INCOME_COLUMN, "income", parse_number)?,
            customer_id: coerce(&record, line, CUSTOMER_COLUMN, "customer_id", parse_integer)?,
        });
    }

    Ok(rows)
}

/// Maps record byte offsets to 1-based line numbers, counting `\n` only.
///
/// A record's reported start may sit on the terminators of the previous line
/// (`\r\n` input, skipped empty lines), so those are stepped over first.
struct LineCounter<'a> {
    bytes: &'a [u8],
    scanned: usize,
    line: u64,
}

impl<'a> LineCounter<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            bytes: content.as_bytes(),
            scanned: 0,
            line: 1,
        }
    }

    fn line_of(&mut self, position: Option<&Position>) -> u64 {
        let Some(position) = position else {
            return self.line;
        };
        let mut start = usize::try_from(position.byte())
            .unwrap_or(usize::MAX)
            .min(self.bytes.len());
        while start < self.bytes.len() && matches!(self.bytes[start], b'\r' | b'\n') {
            start += 1;
        }
        if start > self.scanned {
            let newlines = self.bytes[self.scanned..start]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.line += newlines as u64;
            self.scanned = start;
        }
        self.line
    }
}

fn coerce<T>(
    record: &StringRecord,
    line: u64,
    column: usize,
    name: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ParseError> {
    let raw = record.get(column).unwrap_or_default();
    parse(raw).ok_or_else(|| ParseError::NotNumeric {
        line,
        column,
        name,
        value: raw.to_string(),
    })
}

/// Reduce rows to one aggregate per customer.
///
/// `max_period` is the largest period among the customer's rows and
/// `total_income` sums the income of *every* row at that period. Rows at earlier
/// periods contribute nothing: a later period replaces the running sum instead of
/// adding to it.
pub fn aggregate(rows: &[RawRow]) -> Vec<CustomerAggregate> {
    let mut by_customer: BTreeMap<i64, CustomerAggregate> = BTreeMap::new();

    for row in rows {
        match by_customer.entry(row.customer_id) {
            Entry::Vacant(slot) => {
                slot.insert(CustomerAggregate {
                    customer_id: row.customer_id,
                    max_period: row.period,
                    total_income: row.income,
                });
            }
            Entry::Occupied(mut slot) => {
                let agg = slot.get_mut();
                match row.period.cmp(&agg.max_period) {
                    Ordering::Greater => {
                        agg.max_period = row.period;
                        agg.total_income = row.income;
                    }
                    Ordering::Equal => agg.total_income += row.income,
                    Ordering::Less => {}
                }
            }
        }
    }

    by_customer.into_values().collect()
}

/// Parse `content` and compute the per-customer aggregate.
#[tracing::instrument(level = "debug", skip(content), fields(bytes = content.len()))]
pub fn process_client_renta_data(content: &str) -> Result<Aggregation, ParseError> {
    let rows = parse_rows(content)?;
    let customers = aggregate(&rows);

    info!(
        rows = rows.len(),
        distinct_customers = customers.len(),
        "loaded income rows"
    );
    for c in customers.iter().take(3) {
        debug!(
            customer_id = c.customer_id,
            max_period = c.max_period,
            total_income = c.total_income,
            "sample aggregate"
        );
    }

    Ok(Aggregation {
        total_rows: rows.len(),
        distinct_customers: customers.len(),
        customers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Build a 14-field line with the consumed columns filled in.
    fn line(period: &str, income: &str, customer: &str) -> String {
        format!("C1;{period};{income};215940;76363085;4;1003;P;01;E;P;R;{customer};3")
    }

    fn sorted(mut v: Vec<CustomerAggregate>) -> Vec<CustomerAggregate> {
        v.sort_by_key(|c| c.customer_id);
        v
    }

    #[test]
    fn ties_at_max_period_are_summed() {
        let content = r#"C1;202504;1000;215940;76363085;4;1003;P;01;E;P;R;9034463;3
C1;202504;500;215940;76363085;4;1003;P;01;E;P;R;9034463;3
C1;202503;800;215940;76363085;4;1003;P;01;E;P;R;9034463;3"#;

        let result = process_client_renta_data(content).unwrap();
        assert_eq!(result.total_rows, 3);
        assert_eq!(result.distinct_customers, 1);
        assert_eq!(
            result.customers,
            vec![CustomerAggregate {
                customer_id: 9034463,
                max_period: 202504,
                total_income: 1500.0,
            }]
        );
    }

    #[test]
    fn earlier_period_after_max_is_ignored() {
        let content = [
            line("202503", "800", "7"),
            line("202504", "1000", "7"),
            line("202502", "50", "7"),
            line("202504", "500", "7"),
        ]
        .join("\n");

        let result = process_client_renta_data(&content).unwrap();
        assert_eq!(result.customers[0].max_period, 202504);
        assert_eq!(result.customers[0].total_income, 1500.0);
    }

    #[test]
    fn one_row_per_customer() {
        let content = [line("202504", "1000", "2"), line("202401", "250.5", "1")].join("\n");

        let result = process_client_renta_data(&content).unwrap();
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.distinct_customers, 2);
        assert_eq!(
            sorted(result.customers),
            vec![
                CustomerAggregate {
                    customer_id: 1,
                    max_period: 202401,
                    total_income: 250.5,
                },
                CustomerAggregate {
                    customer_id: 2,
                    max_period: 202504,
                    total_income: 1000.0,
                },
            ]
        );
    }

    #[test]
    fn empty_input_gives_empty_aggregate() {
        for content in ["", "\n", "\n\n"] {
            let result = process_client_renta_data(content).unwrap();
            assert!(result.customers.is_empty());
            assert_eq!(result.total_rows, 0);
            assert_eq!(result.distinct_customers, 0);
        }
    }

    #[test]
    fn non_numeric_income_fails_whole_file() {
        let content = [line("202504", "1000", "1"), line("202504", "abc", "1")].join("\n");

        match process_client_renta_data(&content) {
            Err(ParseError::NotNumeric {
                line, column, value, ..
            }) => {
                assert_eq!(line, 2);
                assert_eq!(column, INCOME_COLUMN);
                assert_eq!(value, "abc");
            }
            other => panic!("expected NotNumeric, got {:?}", other),
        }
    }

    #[test]
    fn non_numeric_period_and_customer_fail() {
        let bad_period = line("2025-04", "1", "1");
        assert!(matches!(
            parse_rows(&bad_period),
            Err(ParseError::NotNumeric { column: PERIOD_COLUMN, .. })
        ));

        let bad_customer = line("202504", "1", "");
        assert!(matches!(
            parse_rows(&bad_customer),
            Err(ParseError::NotNumeric { column: CUSTOMER_COLUMN, .. })
        ));
    }

    #[test]
    fn short_row_fails_fast() {
        let content = format!("{}\nC1;202504;1000;x", line("202504", "1", "1"));
        match parse_rows(&content) {
            Err(ParseError::MissingColumns {
                line,
                found,
                required,
            }) => {
                assert_eq!(line, 2);
                assert_eq!(found, 4);
                assert_eq!(required, REQUIRED_COLUMNS);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn whitespace_only_lines_are_skipped() {
        let content = format!(
            "{}\n   \n{}\n\t \n   ",
            line("202504", "1000", "1"),
            line("202504", "500", "1")
        );
        let result = process_client_renta_data(&content).unwrap();
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.customers[0].total_income, 1500.0);
    }

    #[test]
    fn error_line_counts_crlf_and_blank_lines() {
        let row = line("202504", "1", "1");

        let crlf = format!("{row}\r\n{row}\r\nC1;x\r\n");
        assert!(matches!(
            parse_rows(&crlf),
            Err(ParseError::MissingColumns { line: 3, found: 2, .. })
        ));

        let padded = format!("{row}\n\n   \r\n{row}\r\nC1;202504;abc;a;b;c;d;e;f;g;h;i;1\n");
        assert!(matches!(
            parse_rows(&padded),
            Err(ParseError::NotNumeric { line: 5, column: INCOME_COLUMN, .. })
        ));
    }

    #[test]
    fn quoted_and_padded_fields_are_coerced() {
        let content = r#"C1;"202504"; 1000 ;a;b;c;d;e;f;g;h;i;"42";z"#;
        let rows = parse_rows(content).unwrap();
        assert_eq!(
            rows,
            vec![RawRow {
                period: 202504,
                income: 1000.0,
                customer_id: 42,
            }]
        );
    }

    /// xorshift64, enough to spread values over a few customers and periods.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0 % bound
        }
    }

    fn random_input(rng: &mut Rng) -> (String, Vec<RawRow>) {
        let n = rng.next(40) as usize;
        let mut rows = Vec::with_capacity(n);
        for _ in 0..n {
            rows.push(RawRow {
                period: 202401 + rng.next(4) as i64,
                income: rng.next(1000) as f64,
                customer_id: 100 + rng.next(6) as i64,
            });
        }
        let content = rows
            .iter()
            .map(|r| {
                line(
                    &r.period.to_string(),
                    &r.income.to_string(),
                    &r.customer_id.to_string(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        (content, rows)
    }

    #[test]
    fn invariants_hold_on_generated_inputs() {
        let mut rng = Rng(0x_d00d_f00d);
        for _ in 0..200 {
            let (content, rows) = random_input(&mut rng);
            let result = process_client_renta_data(&content).unwrap();

            assert_eq!(result.total_rows, rows.len());

            let mut periods: HashMap<i64, Vec<i64>> = HashMap::new();
            for r in &rows {
                periods.entry(r.customer_id).or_default().push(r.period);
            }
            assert_eq!(result.customers.len(), periods.len());
            assert_eq!(result.distinct_customers, periods.len());

            for agg in &result.customers {
                let max = periods[&agg.customer_id].iter().max().copied().unwrap();
                assert_eq!(agg.max_period, max);
                let expected: f64 = rows
                    .iter()
                    .filter(|r| r.customer_id == agg.customer_id && r.period == max)
                    .map(|r| r.income)
                    .sum();
                assert_eq!(agg.total_income, expected);
            }

            // Incomes are non-negative integers, so these sums are exact.
            let aggregated: f64 = result.customers.iter().map(|c| c.total_income).sum();
            let raw: f64 = rows.iter().map(|r| r.income).sum();
            assert!(aggregated <= raw);
            let single_period = periods.values().all(|p| p.iter().all(|x| *x == p[0]));
            if single_period {
                assert_eq!(aggregated, raw);
            }

            let again = process_client_renta_data(&content).unwrap();
            assert_eq!(sorted(again.customers), sorted(result.customers));
        }
    }
}
