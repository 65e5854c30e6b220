//! Column layout and vocabularies of the court returns CSV.

pub const COURT: &str = "court";
pub const DATE_DD: &str = "date_dd";
pub const DATE_MON: &str = "date_mon";
pub const DATE_YYYY: &str = "date_yyyy";
pub const CASEID_TYPE: &str = "caseid_type";
pub const CASEID_NO: &str = "caseid_no";
pub const FILED_DD: &str = "filed_dd";
pub const FILED_MON: &str = "filed_mon";
pub const FILED_YYYY: &str = "filed_yyyy";
pub const ORIGINAL_COURT: &str = "original_court";
pub const ORIGINAL_CODE: &str = "original_code";
pub const ORIGINAL_NUMBER: &str = "original_number";
pub const ORIGINAL_YEAR: &str = "original_year";
pub const CASE_TYPE: &str = "case_type";
pub const JUDGE_COLUMNS: [&str; 7] = [
    "judge_1", "judge_2", "judge_3", "judge_4", "judge_5", "judge_6", "judge_7",
];
pub const COMING_FOR: &str = "comingfor";
pub const OUTCOME: &str = "outcome";
pub const REASON_ADJ: &str = "reason_adj";
pub const NEXT_DD: &str = "next_dd";
pub const NEXT_MON: &str = "next_mon";
pub const NEXT_YYYY: &str = "next_yyyy";
pub const MALE_APPLICANT: &str = "male_applicant";
pub const FEMALE_APPLICANT: &str = "female_applicant";
pub const ORGANIZATION_APPLICANT: &str = "organization_applicant";
pub const MALE_DEFENDANT: &str = "male_defendant";
pub const FEMALE_DEFENDANT: &str = "female_defendant";
pub const ORGANIZATION_DEFENDANT: &str = "organization_defendant";
pub const LEGAL_REP: &str = "legalrep";
pub const APPLICANT_WITNESS: &str = "applicant_witness";
pub const DEFENDANT_WITNESS: &str = "defendant_witness";
pub const CUSTODY: &str = "custody";
pub const OTHER_DETAILS: &str = "other_details";

/// Columns that must appear in the header row.
pub const REQUIRED_COLUMNS: [&str; 26] = [
    COURT,
    DATE_DD,
    DATE_MON,
    DATE_YYYY,
    CASEID_TYPE,
    CASEID_NO,
    FILED_DD,
    FILED_MON,
    FILED_YYYY,
    CASE_TYPE,
    "judge_1",
    COMING_FOR,
    OUTCOME,
    MALE_APPLICANT,
    FEMALE_APPLICANT,
    ORGANIZATION_APPLICANT,
    MALE_DEFENDANT,
    FEMALE_DEFENDANT,
    ORGANIZATION_DEFENDANT,
    LEGAL_REP,
    APPLICANT_WITNESS,
    DEFENDANT_WITNESS,
    CUSTODY,
    NEXT_DD,
    NEXT_MON,
    NEXT_YYYY,
];

/// Columns that may be absent from the header entirely.
pub const OPTIONAL_COLUMNS: [&str; 12] = [
    ORIGINAL_COURT,
    ORIGINAL_CODE,
    ORIGINAL_NUMBER,
    ORIGINAL_YEAR,
    "judge_2",
    "judge_3",
    "judge_4",
    "judge_5",
    "judge_6",
    "judge_7",
    REASON_ADJ,
    OTHER_DETAILS,
];

pub fn is_known_column(name: &str) -> bool {
    REQUIRED_COLUMNS.contains(&name) || OPTIONAL_COLUMNS.contains(&name)
}

// Matching policy for closed vocabularies: month abbreviations and case
// types are free-text labels clerks type by hand, so they match without
// regard to ASCII case (case types also collapse inner whitespace) and are
// stored in their canonical spelling. `legalrep` is a flag, not a label,
// and accepts only the exact strings in `LEGAL_REP_VALUES`.

pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Returns the canonical abbreviation and 1-based month number.
pub fn parse_month(value: &str) -> Option<(&'static str, u32)> {
    MONTHS
        .iter()
        .enumerate()
        .find(|(_, month)| month.eq_ignore_ascii_case(value))
        .map(|(idx, month)| (*month, idx as u32 + 1))
}

pub const CASE_TYPES: [&str; 13] = [
    "Criminal",
    "Civil",
    "Succession",
    "Family",
    "Children",
    "Traffic",
    "Environment and Land",
    "Employment and Labour Relations",
    "Commercial",
    "Judicial Review",
    "Constitutional Petition",
    "Appeal",
    "Miscellaneous",
];

pub fn canonical_case_type(value: &str) -> Option<&'static str> {
    let wanted = value.split_whitespace().collect::<Vec<_>>().join(" ");
    CASE_TYPES
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(&wanted))
        .copied()
}

pub const MIN_FILING_YEAR: i32 = 1960;
pub const MIN_ACTIVITY_YEAR: i32 = 2015;

pub const LEGAL_REP_VALUES: [&str; 2] = ["Yes", "No"];

/// Largest party, witness or custody count a row may carry. Counts are
/// stored in 32-bit signed columns.
pub const MAX_COUNT: i64 = i32::MAX as i64;
