use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::model::{CaseReturnRow, OriginalCase, PartyCounts, RawCaseRow};
use crate::schema::{
    self, canonical_case_type, parse_month, CASE_TYPES, LEGAL_REP_VALUES, MIN_ACTIVITY_YEAR,
    MIN_FILING_YEAR,
};

static JUDGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\s,.'\-]+$").expect("judge name pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    OutOfRange,
    InvalidFormat,
    InvalidCharacters,
    InvalidChoice,
    InvalidDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowValidation {
    pub row_number: u32,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<CaseReturnRow>,
    pub errors: Vec<FieldError>,
}

/// Applies the court-returns field rules to a single row.
#[derive(Debug, Clone, Copy)]
pub struct RowValidator {
    current_year: i32,
}

impl RowValidator {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn for_today() -> Self {
        Self::new(Utc::now().year())
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn validate_row(&self, row: &RawCaseRow, row_number: u32) -> RowValidation {
        let mut check = FieldChecks {
            current_year: self.current_year,
            errors: Vec::new(),
        };

        let court = check.required_text(schema::COURT, "Court", &row.court);
        let activity_date = check.date(
            [schema::DATE_DD, schema::DATE_MON, schema::DATE_YYYY],
            [
                row.date_dd.as_str(),
                row.date_mon.as_str(),
                row.date_yyyy.as_str(),
            ],
            YearRule::Activity,
        );
        let case_id_type = check.required_text(schema::CASEID_TYPE, "Case ID type", &row.caseid_type);
        let case_id_number = check.required_text(schema::CASEID_NO, "Case number", &row.caseid_no);
        let filed_date = check.date(
            [schema::FILED_DD, schema::FILED_MON, schema::FILED_YYYY],
            [
                row.filed_dd.as_str(),
                row.filed_mon.as_str(),
                row.filed_yyyy.as_str(),
            ],
            YearRule::Filing,
        );
        if let (Some(activity), Some(filed)) = (activity_date, filed_date) {
            check.filed_not_after_activity(filed, activity, &row.filed_yyyy);
        }
        let original = check.original_case(row);
        let case_type = check.case_type(&row.case_type);
        let judges = check.judges(row);
        let coming_for = check.required_text(schema::COMING_FOR, "Coming for", &row.comingfor);
        let outcome = check.required_text(schema::OUTCOME, "Outcome", &row.outcome);
        let next_hearing = check.next_hearing(row);
        let parties = check.parties(row);
        let legal_representation = check.legal_rep(&row.legalrep);
        let applicant_witnesses = check.count(
            schema::APPLICANT_WITNESS,
            "Applicant witnesses",
            &row.applicant_witness,
        );
        let defendant_witnesses = check.count(
            schema::DEFENDANT_WITNESS,
            "Defendant witnesses",
            &row.defendant_witness,
        );
        let custody = check.count(schema::CUSTODY, "Custody", &row.custody);

        if !check.errors.is_empty() {
            return RowValidation {
                row_number,
                is_valid: false,
                validated: None,
                errors: check.errors,
            };
        }

        // Every field check above reported an error for any `None`, so an
        // error-free pass implies all required values are present.
        let validated = match (
            court,
            activity_date,
            case_id_type,
            case_id_number,
            filed_date,
            original,
            case_type,
            judges,
            coming_for,
            outcome,
            next_hearing,
            parties,
            legal_representation,
            applicant_witnesses,
            defendant_witnesses,
            custody,
        ) {
            (
                Some(court),
                Some(activity_date),
                Some(case_id_type),
                Some(case_id_number),
                Some(filed_date),
                Some(original),
                Some(case_type),
                Some(judges),
                Some(coming_for),
                Some(outcome),
                Some(next_hearing),
                Some(parties),
                Some(legal_representation),
                Some(applicant_witnesses),
                Some(defendant_witnesses),
                Some(custody),
            ) => CaseReturnRow {
                row_number,
                court,
                activity_date,
                case_id_type,
                case_id_number,
                filed_date,
                original,
                case_type,
                judges,
                coming_for,
                outcome,
                reason_adjournment: optional_text(&row.reason_adj),
                next_hearing,
                parties,
                legal_representation,
                applicant_witnesses,
                defendant_witnesses,
                custody,
                other_details: optional_text(&row.other_details),
                fingerprint: row.fingerprint(),
            },
            _ => {
                return RowValidation {
                    row_number,
                    is_valid: false,
                    validated: None,
                    errors: vec![FieldError {
                        field: "row".to_string(),
                        kind: FieldErrorKind::InvalidFormat,
                        message: "Row could not be normalized".to_string(),
                        suggestion: "Check that every required column has a value".to_string(),
                        value: None,
                    }],
                }
            }
        };

        RowValidation {
            row_number,
            is_valid: true,
            validated: Some(validated),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum YearRule {
    Filing,
    Activity,
    Original,
}

impl YearRule {
    fn min(self) -> i32 {
        match self {
            YearRule::Filing | YearRule::Original => MIN_FILING_YEAR,
            YearRule::Activity => MIN_ACTIVITY_YEAR,
        }
    }

    fn label(self) -> &'static str {
        match self {
            YearRule::Filing => "Filing year",
            YearRule::Activity => "Year",
            YearRule::Original => "Original case year",
        }
    }
}

struct FieldChecks {
    current_year: i32,
    errors: Vec<FieldError>,
}

impl FieldChecks {
    fn push(
        &mut self,
        field: &str,
        kind: FieldErrorKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        value: &str,
    ) {
        self.errors.push(FieldError {
            field: field.to_string(),
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
            value: (!value.trim().is_empty()).then(|| value.trim().to_string()),
        });
    }

    fn missing(&mut self, field: &str, label: &str) {
        self.push(
            field,
            FieldErrorKind::Missing,
            format!("{label} is required"),
            format!("Provide a value for '{field}'. This column cannot be empty."),
            "",
        );
    }

    fn required_text(&mut self, field: &str, label: &str, value: &str) -> Option<String> {
        match optional_text(value) {
            Some(text) => Some(text),
            None => {
                self.missing(field, label);
                None
            }
        }
    }

    fn day(&mut self, field: &str, value: &str) -> Option<u32> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(field, "Day");
            return None;
        }
        let suggestion = format!("Day must be between 1-31. Found: {trimmed}");
        match trimmed.parse::<i64>() {
            Ok(day) if (1..=31).contains(&day) => Some(day as u32),
            Ok(_) => {
                self.push(
                    field,
                    FieldErrorKind::OutOfRange,
                    format!("Day in '{field}' is out of range"),
                    suggestion,
                    trimmed,
                );
                None
            }
            Err(_) => {
                self.push(
                    field,
                    FieldErrorKind::InvalidFormat,
                    format!("Day in '{field}' is not a whole number"),
                    suggestion,
                    trimmed,
                );
                None
            }
        }
    }

    fn month(&mut self, field: &str, value: &str) -> Option<(&'static str, u32)> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(field, "Month");
            return None;
        }
        let parsed = parse_month(trimmed);
        if parsed.is_none() {
            self.push(
                field,
                FieldErrorKind::InvalidFormat,
                format!("Month in '{field}' is not a 3-letter abbreviation"),
                format!(
                    "Month must be a 3-letter abbreviation ({}). Found: {trimmed}",
                    schema::MONTHS.join(", ")
                ),
                trimmed,
            );
        }
        parsed
    }

    fn year(&mut self, field: &str, value: &str, rule: YearRule) -> Option<i32> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(field, rule.label());
            return None;
        }
        let suggestion = format!(
            "{} must be between {}-{}. Found: {trimmed}",
            rule.label(),
            rule.min(),
            self.current_year
        );
        match trimmed.parse::<i32>() {
            Ok(year) if year >= rule.min() && year <= self.current_year => Some(year),
            Ok(year) => {
                let bound = if year < rule.min() {
                    format!("earlier than {}", rule.min())
                } else {
                    format!("later than {}", self.current_year)
                };
                self.push(
                    field,
                    FieldErrorKind::OutOfRange,
                    format!("{} in '{field}' is {bound}", rule.label()),
                    suggestion,
                    trimmed,
                );
                None
            }
            Err(_) => {
                self.push(
                    field,
                    FieldErrorKind::InvalidFormat,
                    format!("{} in '{field}' is not a 4-digit year", rule.label()),
                    suggestion,
                    trimmed,
                );
                None
            }
        }
    }

    /// A case cannot be heard before it was filed.
    fn filed_not_after_activity(&mut self, filed: NaiveDate, activity: NaiveDate, raw_year: &str) {
        if filed > activity {
            self.push(
                schema::FILED_YYYY,
                FieldErrorKind::InvalidDate,
                "Filing date is after the activity date",
                format!(
                    "The case must be filed on or before the activity date ({activity}). Found filing date: {filed}"
                ),
                raw_year.trim(),
            );
        }
    }

    fn date(&mut self, fields: [&str; 3], values: [&str; 3], rule: YearRule) -> Option<NaiveDate> {
        let day = self.day(fields[0], values[0]);
        let month = self.month(fields[1], values[1]);
        let year = self.year(fields[2], values[2], rule);
        let (day, (month_name, month), year) = (day?, month?, year?);

        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => Some(date),
            None => {
                let last_day = days_in_month(year, month);
                self.push(
                    fields[0],
                    FieldErrorKind::InvalidDate,
                    format!("{day} {month_name} {year} is not a valid calendar date"),
                    format!("{month_name} {year} has {last_day} days. Found day: {day}"),
                    values[0],
                );
                None
            }
        }
    }

    fn next_hearing(&mut self, row: &RawCaseRow) -> Option<Option<NaiveDate>> {
        let fields = [schema::NEXT_DD, schema::NEXT_MON, schema::NEXT_YYYY];
        let values = [
            row.next_dd.as_str(),
            row.next_mon.as_str(),
            row.next_yyyy.as_str(),
        ];
        let present = values.iter().filter(|v| !v.trim().is_empty()).count();

        match present {
            0 => Some(None),
            3 => self.date(fields, values, YearRule::Activity).map(Some),
            _ => {
                for (field, value) in fields.iter().zip(values) {
                    if value.trim().is_empty() {
                        self.push(
                            field,
                            FieldErrorKind::Missing,
                            "Next hearing date is incomplete",
                            "Provide next_dd, next_mon and next_yyyy together or leave all three empty",
                            "",
                        );
                    }
                }
                None
            }
        }
    }

    fn original_case(&mut self, row: &RawCaseRow) -> Option<Option<OriginalCase>> {
        let year = if row.original_year.trim().is_empty() {
            Some(None)
        } else {
            self.year(schema::ORIGINAL_YEAR, &row.original_year, YearRule::Original)
                .map(Some)
        };
        let year = year?;

        let original = OriginalCase {
            court: optional_text(&row.original_court),
            code: optional_text(&row.original_code),
            number: optional_text(&row.original_number),
            year,
        };
        let empty = original.court.is_none()
            && original.code.is_none()
            && original.number.is_none()
            && original.year.is_none();
        Some((!empty).then_some(original))
    }

    fn case_type(&mut self, value: &str) -> Option<&'static str> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(schema::CASE_TYPE, "Case type");
            return None;
        }
        let canonical = canonical_case_type(trimmed);
        if canonical.is_none() {
            self.push(
                schema::CASE_TYPE,
                FieldErrorKind::InvalidChoice,
                "Unknown case type",
                format!(
                    "Case type must be one of: {}. Found: {trimmed}",
                    CASE_TYPES.join(", ")
                ),
                trimmed,
            );
        }
        canonical
    }

    fn judges(&mut self, row: &RawCaseRow) -> Option<Vec<String>> {
        let mut judges = Vec::new();
        let mut ok = true;

        for (idx, (field, value)) in row.judges().into_iter().enumerate() {
            let Some(name) = optional_text(value) else {
                if idx == 0 {
                    self.missing(field, "Presiding judge");
                    ok = false;
                }
                continue;
            };

            if JUDGE_NAME.is_match(&name) {
                judges.push(collapse_whitespace(&name));
            } else {
                self.push(
                    field,
                    FieldErrorKind::InvalidCharacters,
                    format!("Judge name in '{field}' contains invalid characters"),
                    format!(
                        "Judge names may only contain letters, spaces, commas, periods, hyphens and apostrophes. Found: {name}"
                    ),
                    &name,
                );
                ok = false;
            }
        }

        ok.then_some(judges)
    }

    fn count(&mut self, field: &str, label: &str, value: &str) -> Option<u32> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(field, label);
            return None;
        }
        let suggestion = format!("{label} must be a whole number of 0 or more. Found: {trimmed}");
        match trimmed.parse::<i64>() {
            Ok(count) if count < 0 => {
                self.push(
                    field,
                    FieldErrorKind::OutOfRange,
                    format!("{label} cannot be negative"),
                    suggestion,
                    trimmed,
                );
                None
            }
            Ok(count) if count > schema::MAX_COUNT => {
                self.push(
                    field,
                    FieldErrorKind::OutOfRange,
                    format!("{label} cannot exceed {}", schema::MAX_COUNT),
                    format!(
                        "{label} must be between 0 and {}. Found: {trimmed}",
                        schema::MAX_COUNT
                    ),
                    trimmed,
                );
                None
            }
            Ok(count) => u32::try_from(count).ok(),
            Err(_) => {
                self.push(
                    field,
                    FieldErrorKind::InvalidFormat,
                    format!("{label} is not a whole number"),
                    suggestion,
                    trimmed,
                );
                None
            }
        }
    }

    fn parties(&mut self, row: &RawCaseRow) -> Option<PartyCounts> {
        let male_applicant = self.count(schema::MALE_APPLICANT, "Male applicants", &row.male_applicant);
        let female_applicant =
            self.count(schema::FEMALE_APPLICANT, "Female applicants", &row.female_applicant);
        let organization_applicant = self.count(
            schema::ORGANIZATION_APPLICANT,
            "Organization applicants",
            &row.organization_applicant,
        );
        let male_defendant = self.count(schema::MALE_DEFENDANT, "Male defendants", &row.male_defendant);
        let female_defendant =
            self.count(schema::FEMALE_DEFENDANT, "Female defendants", &row.female_defendant);
        let organization_defendant = self.count(
            schema::ORGANIZATION_DEFENDANT,
            "Organization defendants",
            &row.organization_defendant,
        );

        Some(PartyCounts {
            male_applicant: male_applicant?,
            female_applicant: female_applicant?,
            organization_applicant: organization_applicant?,
            male_defendant: male_defendant?,
            female_defendant: female_defendant?,
            organization_defendant: organization_defendant?,
        })
    }

    fn legal_rep(&mut self, value: &str) -> Option<bool> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(schema::LEGAL_REP, "Legal representation");
            return None;
        }
        match trimmed {
            "Yes" => Some(true),
            "No" => Some(false),
            other => {
                self.push(
                    schema::LEGAL_REP,
                    FieldErrorKind::InvalidChoice,
                    "Legal representation must be Yes or No",
                    format!(
                        "Legal representation must be exactly '{}' or '{}'. Found: {other}",
                        LEGAL_REP_VALUES[0], LEGAL_REP_VALUES[1]
                    ),
                    other,
                );
                None
            }
        }
    }
}

fn optional_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}
