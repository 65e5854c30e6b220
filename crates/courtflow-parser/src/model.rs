use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One CSV record exactly as uploaded. Absent columns deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCaseRow {
    pub court: String,
    pub date_dd: String,
    pub date_mon: String,
    pub date_yyyy: String,
    pub caseid_type: String,
    pub caseid_no: String,
    pub filed_dd: String,
    pub filed_mon: String,
    pub filed_yyyy: String,
    pub original_court: String,
    pub original_code: String,
    pub original_number: String,
    pub original_year: String,
    pub case_type: String,
    pub judge_1: String,
    pub judge_2: String,
    pub judge_3: String,
    pub judge_4: String,
    pub judge_5: String,
    pub judge_6: String,
    pub judge_7: String,
    pub comingfor: String,
    pub outcome: String,
    pub reason_adj: String,
    pub next_dd: String,
    pub next_mon: String,
    pub next_yyyy: String,
    pub male_applicant: String,
    pub female_applicant: String,
    pub organization_applicant: String,
    pub male_defendant: String,
    pub female_defendant: String,
    pub organization_defendant: String,
    pub legalrep: String,
    pub applicant_witness: String,
    pub defendant_witness: String,
    pub custody: String,
    pub other_details: String,
}

impl RawCaseRow {
    pub fn judges(&self) -> [(&'static str, &str); 7] {
        [
            ("judge_1", self.judge_1.as_str()),
            ("judge_2", self.judge_2.as_str()),
            ("judge_3", self.judge_3.as_str()),
            ("judge_4", self.judge_4.as_str()),
            ("judge_5", self.judge_5.as_str()),
            ("judge_6", self.judge_6.as_str()),
            ("judge_7", self.judge_7.as_str()),
        ]
    }

    /// SHA-256 over the trimmed, case-folded field values. Two rows with the
    /// same fingerprint describe the same activity.
    pub fn fingerprint(&self) -> String {
        let fields = [
            &self.court,
            &self.date_dd,
            &self.date_mon,
            &self.date_yyyy,
            &self.caseid_type,
            &self.caseid_no,
            &self.filed_dd,
            &self.filed_mon,
            &self.filed_yyyy,
            &self.original_court,
            &self.original_code,
            &self.original_number,
            &self.original_year,
            &self.case_type,
            &self.judge_1,
            &self.judge_2,
            &self.judge_3,
            &self.judge_4,
            &self.judge_5,
            &self.judge_6,
            &self.judge_7,
            &self.comingfor,
            &self.outcome,
            &self.reason_adj,
            &self.next_dd,
            &self.next_mon,
            &self.next_yyyy,
            &self.male_applicant,
            &self.female_applicant,
            &self.organization_applicant,
            &self.male_defendant,
            &self.female_defendant,
            &self.organization_defendant,
            &self.legalrep,
            &self.applicant_witness,
            &self.defendant_witness,
            &self.custody,
            &self.other_details,
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(field.trim().to_lowercase().as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyCounts {
    pub male_applicant: u32,
    pub female_applicant: u32,
    pub organization_applicant: u32,
    pub male_defendant: u32,
    pub female_defendant: u32,
    pub organization_defendant: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalCase {
    pub court: Option<String>,
    pub code: Option<String>,
    pub number: Option<String>,
    pub year: Option<i32>,
}

/// A row that passed every field rule, with values normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReturnRow {
    pub row_number: u32,
    pub court: String,
    pub activity_date: NaiveDate,
    pub case_id_type: String,
    pub case_id_number: String,
    pub filed_date: NaiveDate,
    pub original: Option<OriginalCase>,
    pub case_type: &'static str,
    /// `judges[0]` is the presiding judge; at most seven entries.
    pub judges: Vec<String>,
    pub coming_for: String,
    pub outcome: String,
    pub reason_adjournment: Option<String>,
    pub next_hearing: Option<NaiveDate>,
    pub parties: PartyCounts,
    pub legal_representation: bool,
    pub applicant_witnesses: u32,
    pub defendant_witnesses: u32,
    pub custody: u32,
    pub other_details: Option<String>,
    pub fingerprint: String,
}

impl CaseReturnRow {
    pub fn case_number(&self) -> String {
        format!("{} {}", self.case_id_type, self.case_id_number)
    }
}
