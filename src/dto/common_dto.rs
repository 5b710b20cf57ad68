use serde::{Deserialize, Serialize};

use crate::services::assignment_engine::AssignmentOutcome;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

// Response genérica
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
    pub warnings: Vec<String>,
    /// Qué pasó con la asignación pedida (sólo en mutaciones de riders)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentOutcome>,
}

impl<T> ApiResponse<T> {
    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
            warnings: Vec::new(),
            assignment: None,
        }
    }

    pub fn with_assignment(mut self, outcome: AssignmentOutcome, warnings: Vec<String>) -> Self {
        self.assignment = Some(outcome);
        self.warnings = warnings;
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: None,
            warnings: Vec::new(),
            assignment: None,
        }
    }
}

/// Ventana de paginación ya saneada
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// `page` mínimo 1, `limit` entre 1 y 100 (20 por defecto)
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(DEFAULT_PAGE).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

// Página de resultados
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let limit = pagination.limit as u64;
        Self {
            items,
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages: (total + limit - 1) / limit,
        }
    }
}
