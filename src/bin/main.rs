// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use commission_ledger::{
    AdminSettings, AttemptId, DriverId, LedgerError, LedgerStore, Region, TripId, TripSettlement,
    VerificationStatus, evaluate,
};
use csv::{ReaderBuilder, Trim, Writer};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Commission Ledger - Replay driver ledger events
///
/// Reads signups, trips, confirmed payments and verification decisions
/// from a CSV file and writes each driver's eligibility to stdout.
#[derive(Parser, Debug)]
#[command(name = "commission-ledger")]
#[command(about = "Replays driver ledger events and reports eligibility", long_about = None)]
struct Args {
    /// Path to CSV file with ledger events
    ///
    /// Expected format: type,driver,ref,amount,detail
    /// Example: cargo run -- events.csv > eligibility.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Admin settings file (TOML)
    #[arg(long, env = "LEDGER_SETTINGS")]
    settings: Option<PathBuf>,

    /// Overrides the commission rate from the settings file
    #[arg(long, env = "LEDGER_COMMISSION_RATE")]
    commission_rate: Option<Decimal>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LEDGER_LOG", default_value = "warn")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("commission_ledger={},warn", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    let store = match replay_events(BufReader::new(file), &settings) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "cannot read events");
            process::exit(1);
        }
    };

    if let Err(e) = write_eligibility(&store, &settings, std::io::stdout()) {
        tracing::error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

fn load_settings(args: &Args) -> Result<AdminSettings, LedgerError> {
    let mut settings = match &args.settings {
        Some(path) => AdminSettings::load(path)?,
        None => AdminSettings::default(),
    };
    if let Some(rate) = args.commission_rate {
        settings.commission_rate = rate;
        settings.validate()?;
    }
    Ok(settings)
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, driver, ref, amount, detail`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event_type: String,
    driver: u32,
    #[serde(rename = "ref", deserialize_with = "csv::invalid_option")]
    reference: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    detail: String,
}

/// One replayable ledger event.
#[derive(Debug, Clone, PartialEq)]
enum LedgerEvent {
    Signup { driver_id: DriverId, region: Region },
    Trip { driver_id: DriverId, trip_id: TripId, fare: Decimal },
    Payment { driver_id: DriverId, amount: Decimal },
    Verification { driver_id: DriverId, status: VerificationStatus },
    Deactivate { driver_id: DriverId },
}

impl CsvRecord {
    /// Converts a CSV record to a ledger event.
    ///
    /// Returns `None` for unknown event types or missing required fields.
    fn into_event(self) -> Option<LedgerEvent> {
        let driver_id = DriverId(self.driver);

        match self.event_type.to_lowercase().as_str() {
            "signup" => Some(LedgerEvent::Signup {
                driver_id,
                region: Region::new(&self.detail),
            }),
            "trip" => Some(LedgerEvent::Trip {
                driver_id,
                trip_id: TripId(self.reference?),
                fare: self.amount?,
            }),
            "payment" => Some(LedgerEvent::Payment {
                driver_id,
                amount: self.amount?,
            }),
            "kyc" => Some(LedgerEvent::Verification {
                driver_id,
                status: VerificationStatus::parse(&self.detail)?,
            }),
            "deactivate" => Some(LedgerEvent::Deactivate { driver_id }),
            _ => None,
        }
    }
}

fn apply_event(
    store: &LedgerStore,
    settings: &AdminSettings,
    event: LedgerEvent,
) -> Result<(), LedgerError> {
    match event {
        LedgerEvent::Signup { driver_id, region } => {
            store.register(driver_id, settings.currency_for(&region), region)?;
        }
        LedgerEvent::Trip {
            driver_id,
            trip_id,
            fare,
        } => {
            let currency = store.fetch(driver_id)?.currency;
            let settlement = TripSettlement::new(
                trip_id,
                driver_id,
                fare,
                settings.commission_rate,
                currency,
                Utc::now(),
            )?;
            store.record_trip(settlement)?;
        }
        LedgerEvent::Payment { driver_id, amount } => {
            // Rows in the export are already provider-confirmed.
            store.settle_payment(driver_id, AttemptId::new(), amount)?;
        }
        LedgerEvent::Verification { driver_id, status } => {
            store.set_verification_status(driver_id, status)?;
        }
        LedgerEvent::Deactivate { driver_id } => {
            store.deactivate(driver_id)?;
        }
    }
    Ok(())
}

/// Replays events from a CSV reader into a fresh store.
///
/// Malformed rows and rejected events are skipped and logged.
///
/// # CSV Format
///
/// Expected columns: `type, driver, ref, amount, detail`
/// - `type`: signup, trip, payment, kyc, deactivate
/// - `driver`: Driver ID (u32)
/// - `ref`: Trip ID (trip rows only)
/// - `amount`: Fare for trips, paid amount for payments
/// - `detail`: Region code for signups, status for kyc rows
///
/// # Example
///
/// ```csv
/// type,driver,ref,amount,detail
/// signup,1,,,ZA
/// kyc,1,,,PENDING
/// kyc,1,,,VERIFIED
/// trip,1,100,420.00,
/// payment,1,,25.20,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn replay_events<R: Read>(reader: R, settings: &AdminSettings) -> Result<LedgerStore, csv::Error> {
    let store = LedgerStore::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(event) = record.into_event() else {
            tracing::warn!(line = line + 2, "skipping unrecognised event");
            continue;
        };
        if let Err(e) = apply_event(&store, settings, event) {
            tracing::warn!(line = line + 2, error = %e, "event rejected");
        }
    }

    Ok(store)
}

/// One output row per driver.
#[derive(Debug, Serialize)]
struct EligibilityRow {
    driver: DriverId,
    region: Region,
    debt: Decimal,
    currency: String,
    verification: &'static str,
    can_work: bool,
    reason: &'static str,
}

/// Writes each driver's eligibility, ordered by driver ID.
///
/// # CSV Format
///
/// Columns: `driver, region, debt, currency, verification, can_work, reason`
fn write_eligibility<W: Write>(
    store: &LedgerStore,
    settings: &AdminSettings,
    writer: W,
) -> Result<(), csv::Error> {
    let mut records: Vec<_> = store.accounts().map(|account| account.record()).collect();
    records.sort_by_key(|record| record.driver_id);

    let mut wtr = Writer::from_writer(writer);
    for record in records {
        let decision = evaluate(
            record.commission_debt,
            &settings.threshold_for(&record.region),
            record.verification_status,
        );
        wtr.serialize(EligibilityRow {
            driver: record.driver_id,
            debt: record
                .commission_debt
                .round_dp(record.currency.minor_units()),
            currency: record.currency.code().to_string(),
            region: record.region,
            verification: record.verification_status.as_str(),
            can_work: decision.can_work,
            reason: decision.reason_code.as_str(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn replay(csv: &str) -> LedgerStore {
        replay_events(Cursor::new(csv), &AdminSettings::default()).unwrap()
    }

    fn output(store: &LedgerStore) -> String {
        let mut out = Vec::new();
        write_eligibility(store, &AdminSettings::default(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    const VERIFIED_DRIVER: &str = "type,driver,ref,amount,detail\n\
                                   signup,1,,,ZA\n\
                                   kyc,1,,,PENDING\n\
                                   kyc,1,,,VERIFIED\n";

    #[test]
    fn parse_signup_uses_regional_currency() {
        let store = replay("type,driver,ref,amount,detail\nsignup,1,,,ke\n");
        let record = store.fetch(DriverId(1)).unwrap();
        assert_eq!(record.region, Region::new("KE"));
        assert_eq!(record.currency.code(), "KES");
    }

    #[test]
    fn parse_trip_adds_fee() {
        let csv = format!("{VERIFIED_DRIVER}trip,1,100,420.00,\n");
        let store = replay(&csv);
        assert_eq!(store.fetch(DriverId(1)).unwrap().commission_debt, dec!(25.20));
    }

    #[test]
    fn duplicate_trip_applies_once() {
        let csv = format!("{VERIFIED_DRIVER}trip,1,100,420.00,\ntrip,1,100,420.00,\n");
        let store = replay(&csv);
        assert_eq!(store.fetch(DriverId(1)).unwrap().commission_debt, dec!(25.20));
    }

    #[test]
    fn parse_payment_reduces_debt() {
        let csv = format!("{VERIFIED_DRIVER}trip,1,100,420.00,\npayment,1,,20.00,\n");
        let store = replay(&csv);
        assert_eq!(store.fetch(DriverId(1)).unwrap().commission_debt, dec!(5.20));
    }

    #[test]
    fn parse_with_whitespace() {
        let csv = "type,driver,ref,amount,detail\n signup , 1 , , , ZA \n";
        let store = replay(csv);
        assert!(store.fetch(DriverId(1)).is_ok());
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = "type,driver,ref,amount,detail\n\
                   signup,1,,,ZA\n\
                   invalid,row,data,here,x\n\
                   kyc,1,,,APPROVED\n\
                   signup,2,,,KE\n";
        let store = replay(csv);
        assert_eq!(store.accounts().count(), 2);
        assert_eq!(
            store.fetch(DriverId(1)).unwrap().verification_status,
            VerificationStatus::NotStarted
        );
    }

    #[test]
    fn rate_override_is_validated() {
        let args = Args::parse_from(["commission-ledger", "events.csv", "--commission-rate", "1.5"]);
        assert!(matches!(load_settings(&args), Err(LedgerError::InvalidSettings(_))));

        let args = Args::parse_from(["commission-ledger", "events.csv", "--commission-rate", "0.1"]);
        assert_eq!(load_settings(&args).unwrap().commission_rate, dec!(0.1));
    }

    #[test]
    fn write_reports_blocked_driver() {
        let csv = format!("{VERIFIED_DRIVER}trip,1,100,1000.00,\n");
        let store = replay(&csv);
        let out = output(&store);
        assert!(out.starts_with("driver,region,debt,currency,verification,can_work,reason\n"));
        assert!(out.contains("1,ZA,60.00,ZAR,VERIFIED,false,DEBT_BLOCKED"));
    }

    #[test]
    fn write_reports_unverified_driver() {
        let store = replay("type,driver,ref,amount,detail\nsignup,2,,,KE\n");
        let out = output(&store);
        assert!(out.contains("2,KE,0,KES,NOT_STARTED,false,KYC_PENDING"));
    }

    #[test]
    fn write_orders_by_driver() {
        let store = replay(
            "type,driver,ref,amount,detail\nsignup,3,,,ZA\nsignup,1,,,ZA\nsignup,2,,,ZA\n",
        );
        let out = output(&store);
        let drivers: Vec<&str> = out
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(drivers, vec!["1", "2", "3"]);
    }
}
