use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("file is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("header row invalid: {message}")]
    InvalidHeader { message: String },

    #[error("data row {row_number} invalid: {message}")]
    DataRow { row_number: u32, message: String },

    #[error("file did not contain any data rows")]
    EmptyData,
}
