use crate::model::InvoiceRecord;

/// `|a - b| <= tol`. A missing amount on either side never matches.
pub fn within_tolerance(a: Option<i64>, b: Option<i64>, tol: i64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.abs_diff(b) <= tol.unsigned_abs(),
        _ => false,
    }
}

/// Which amounts a layer compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountCheck {
    /// Taxable value and total tax each within tolerance.
    TaxableAndTax,
    /// Taxable + tax within tolerance, regardless of split.
    GrandTotal,
}

impl AmountCheck {
    pub fn passes(self, primary: &InvoiceRecord, secondary: &InvoiceRecord, tol: i64) -> bool {
        match self {
            Self::TaxableAndTax => {
                within_tolerance(primary.taxable_paise, secondary.taxable_paise, tol)
                    && within_tolerance(primary.total_tax_paise(), secondary.total_tax_paise(), tol)
            }
            Self::GrandTotal => {
                within_tolerance(primary.grand_total_paise(), secondary.grand_total_paise(), tol)
            }
        }
    }
}

/// Primary grand total minus secondary grand total.
pub fn grand_delta(primary: &InvoiceRecord, secondary: &InvoiceRecord) -> Option<i64> {
    primary
        .grand_total_paise()?
        .checked_sub(secondary.grand_total_paise()?)
}
