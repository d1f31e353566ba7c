use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Reject a zero day count (or window size) with a uniform message.
pub fn ensure_positive(name: &str, value: u32) -> Result<()> {
    if value < 1 {
        return Err(ForecastError::InvalidParameter(format!(
            "{name} must be >= 1, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive("window_days", 1).is_ok());

        let err = ensure_positive("step_days", 0).unwrap_err();
        assert_eq!(
            err,
            ForecastError::InvalidParameter("step_days must be >= 1, got 0".to_string())
        );
        assert_eq!(err.to_string(), "Invalid parameter: step_days must be >= 1, got 0");
    }
}
