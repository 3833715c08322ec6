// Fatture in Cloud issued-document payloads

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// VAT type applied to invoice lines; 0 is the provider's exempt rate
const DEFAULT_VAT_ID: u32 = 0;

/// Invoice form submitted by the UI.
/// Field names match the form's wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceForm {
    pub nome: String,
    pub cognome: String,
    #[serde(rename = "codiceFiscale")]
    pub codice_fiscale: String,
    pub email: String,
    pub causale: String,
    pub importo: f64,
}

impl InvoiceForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.nome.trim().is_empty() || self.cognome.trim().is_empty() {
            return Err(ApiError::Validation(
                "nome and cognome are required".to_string(),
            ));
        }
        if self.codice_fiscale.trim().is_empty() {
            return Err(ApiError::Validation("codiceFiscale is required".to_string()));
        }
        if self.causale.trim().is_empty() {
            return Err(ApiError::Validation("causale is required".to_string()));
        }
        if !self.importo.is_finite() || self.importo <= 0.0 {
            return Err(ApiError::Validation(
                "importo must be a positive amount".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level issued-document request body
#[derive(Debug, Serialize)]
pub struct IssuedDocumentPayload {
    pub data: IssuedDocument,
}

#[derive(Debug, Serialize)]
pub struct IssuedDocument {
    #[serde(rename = "type")]
    pub doc_type: &'static str,
    pub entity: DocumentEntity,
    pub date: NaiveDate,
    pub items_list: Vec<DocumentItem>,
    pub payments_list: Vec<DocumentPayment>,
}

#[derive(Debug, Serialize)]
pub struct DocumentEntity {
    pub name: String,
    pub tax_code: String,
    pub email: String,
    pub country: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DocumentItem {
    pub name: String,
    pub qty: u32,
    pub net_price: f64,
    pub vat: VatRef,
}

#[derive(Debug, Serialize)]
pub struct VatRef {
    pub id: u32,
}

#[derive(Debug, Serialize)]
pub struct DocumentPayment {
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: &'static str,
}

impl IssuedDocumentPayload {
    /// Marshal a submitted form into the provider's invoice payload:
    /// one line item, paid in full on the issue date
    pub fn from_form(form: &InvoiceForm, date: NaiveDate) -> Self {
        Self {
            data: IssuedDocument {
                doc_type: "invoice",
                entity: DocumentEntity {
                    name: format!("{} {}", form.nome.trim(), form.cognome.trim()),
                    tax_code: form.codice_fiscale.trim().to_string(),
                    email: form.email.trim().to_string(),
                    country: "IT",
                },
                date,
                items_list: vec![DocumentItem {
                    name: form.causale.trim().to_string(),
                    qty: 1,
                    net_price: form.importo,
                    vat: VatRef { id: DEFAULT_VAT_ID },
                }],
                payments_list: vec![DocumentPayment {
                    amount: form.importo,
                    due_date: date,
                    status: "paid",
                }],
            },
        }
    }
}

/// Provider response to a created issued document
#[derive(Debug, Deserialize)]
pub struct InvoiceCreated {
    pub data: InvoiceCreatedData,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceCreatedData {
    pub number: Option<i64>,
}
