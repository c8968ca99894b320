pub mod chatdtos;
pub mod contractdtos;
pub mod disputedtos;
pub mod projectdtos;
pub mod reviewdtos;
pub mod supportdtos;
pub mod userdtos;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::error::HttpError;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub status: String,
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            ((total.max(0) as f64) / (limit as f64)).ceil() as u32
        };
        Self {
            status: "success".to_string(),
            data,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct RequestQueryDto {
    #[validate(range(min = 1))]
    pub page: Option<usize>,
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,
}

impl RequestQueryDto {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1) as u32
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        ((self.page() - 1) as i64) * self.limit() as i64
    }
}

pub fn validation_error(errors: ValidationErrors) -> HttpError {
    HttpError::bad_request(errors.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_math() {
        let page: PaginatedResponse<u8> = PaginatedResponse::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);

        let empty: PaginatedResponse<u8> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_query_defaults() {
        let query = RequestQueryDto::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = RequestQueryDto {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(query.offset(), 20);

        let too_big = RequestQueryDto {
            page: Some(1),
            limit: Some(500),
        };
        assert!(too_big.validate().is_err());
    }
}
