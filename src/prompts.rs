//! Instruction text sent to the document-understanding model.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`] or, in service mode,
//! per request. The response *schema* is never overridable: it is derived
//! from [`crate::schema::SchemaVariant`] and appended by [`render_instruction`].

use crate::schema::SchemaVariant;

/// Default instruction for [`SchemaVariant::ContainerLines`] invoices.
pub const CONTAINER_LINES_PROMPT: &str = r#"You are an expert data extraction agent specialized in logistics and shipping documents. Extract the fields below from the attached freight invoice with complete precision.

FIELDS TO EXTRACT
1. invoice_date: Look for "Invoice Date:". Format: DD-MMM-YYYY (e.g. 11-Oct-2021).
2. invoice_number: Look for "Invoice No.:" (e.g. 202057121).
3. bl_number: Look for "HB/L No.:" (e.g. USMSP0000004006).
4. port_of_loading: Look specifically for "Port of Loading", not any other port. Extract the city/location name (e.g. Oakland).
5. cy_cfs_destination: Look for "CY/CFS Destination", which sits between "Port of Discharge" and "Final Destination". Extract the full value including code and location (e.g. "IDJKT / Jakarta, Java, JK"). If it is empty, return null.
6. container_numbers: Look under "Marks and Numbers". Extract ALL container numbers as a list. Each container is an 11-character code (4 letters + 7 digits). Return an array even for a single container (e.g. ["BMOU1441213", "MSKU9876543"]).
7. gross_weights: The "Gross Weight" of EACH container, as an array in the SAME ORDER as container_numbers (e.g. [7678.280, 5432.100]). Return an array even for a single container.
8. total_amount: "Total Amount" at the bottom right, or "Total Invoice / Credit Amount". Numeric value only (e.g. 1341.00).

RULES
- NO HALLUCINATIONS: if a field is not clearly present, return null. Never guess.
- Remove all spaces from container numbers.
- For weights and amounts, remove currency symbols (USD) and unit labels (KGS).
- Use a period (.) as the decimal separator.
- If the invoice number appears in several places, make sure they match and return one instance."#;

/// Default instruction for [`SchemaVariant::InvoiceSummary`] invoices.
pub const INVOICE_SUMMARY_PROMPT: &str = r#"You are an expert data extraction agent specialized in logistics and shipping documents (invoices, bills of lading, demurrage notes). Extract the fields below from the attached document with complete precision.

FIELDS TO EXTRACT
1. invoice_number: Look for "Nº da Fatura", "Invoice Number" or "Invoice No", usually in the top right area of the page.
2. invoice_date: Look for "Data da Fatura" or "Invoice Date", usually in the top right area. Convert the date to mm/dd/yyyy.
3. place_of_receipt: Look for "Place of Receipt", usually under the vessel/voyage direction block.
4. place_of_delivery: Look for "Place of Delivery", usually under the vessel/voyage direction block.
5. bl_number: The Bill of Lading number used to track the shipment. Look for "Bill of Lading".
6. container_number: A standard ISO container number: 4 letters followed by 7 digits (e.g. MSKU1234567). Look under headers like "Container No" or "Contenedor". If the header is present but the value below it is empty, return null. Never return a phone or reference number as a container.
7. pcd: The "PCD" (Price Calculation Date). Convert the date to mm/dd/yyyy.
8. total_payable_amount: The final "Total Payable Amount". Numeric value only (e.g. 650.00), no currency symbols.

RULES
- NO HALLUCINATIONS: if a field is not clearly present in the document, return null. Do not infer or guess.
- Remove all spaces from container numbers (e.g. "MSKU 123 456 7" -> "MSKU1234567").
- Amounts use a period (.) as the decimal separator (e.g. "12.289,10 EUR" -> 12289.10).
- If several numbers appear, prefer the one explicitly labelled with the keywords above."#;

/// Suffix describing the JSON contract. The placeholder `{schema}` is
/// replaced with the pretty-printed response schema.
pub const RESPONSE_CONTRACT_SUFFIX: &str = r#"

OUTPUT FORMAT
Return ONLY one JSON object, with no commentary and no code fences. It must follow this schema; every property may be null:
{schema}"#;

/// Default instruction text for a variant.
pub fn default_prompt(variant: SchemaVariant) -> &'static str {
    match variant {
        SchemaVariant::ContainerLines => CONTAINER_LINES_PROMPT,
        SchemaVariant::InvoiceSummary => INVOICE_SUMMARY_PROMPT,
    }
}

/// Build the full instruction: the (possibly overridden) field semantics
/// followed by the fixed response contract for `variant`.
pub fn render_instruction(variant: SchemaVariant, custom: Option<&str>) -> String {
    let body = custom
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_prompt(variant));
    let schema = serde_json::to_string_pretty(&variant.response_schema())
        .unwrap_or_else(|_| variant.response_schema().to_string());
    format!(
        "{}{}",
        body,
        RESPONSE_CONTRACT_SUFFIX.replace("{schema}", &schema)
    )
}
