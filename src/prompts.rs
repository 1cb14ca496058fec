//! System prompts for LLM-based invoice extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — adding a field to the target schema or
//!    tightening the zero-value rule requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the prompt directly without
//!    calling a real provider, making prompt regressions easy to catch.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// Separator inserted between page texts when a batch is concatenated into
/// one request body.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Default system instruction for extracting structured billing data from a
/// batch of invoice pages.
///
/// The field list is deliberately exhaustive; the model is told to omit
/// anything not explicitly stated on the invoice, to drop zero-value line
/// items unless they reference LLM usage, and to append the aggregate fields
/// it computes itself.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert invoice parser. Extract structured billing and usage information from the following invoice text and page images.
Return the data strictly in JSON format. Include all the following fields when available:
- invoice_number
- invoice_date
- due_date
- billing_period_start
- billing_period_end
- account_id
- team_id
- customer_id / user_id
- payer_name / payer_email
- vendor_name / service_provider
- company or org name (e.g. OpenAI, Groq, Together AI, X.AI, Fireworks AI, Google Cloud, etc.)
- address of payer or provider
- currency
- payment_method
- region
- service_name
- category / department / environment (e.g. dev, staging, production)
- resource_type (e.g. EC2, API, LLM)
- model or instance_type (e.g. g5.12xlarge, Llama3-70B)
- model_provider
- description
- usage_unit
- usage_quantity / units_used
- duration (e.g. hourly, monthly)
- start_time
- end_time
- price_per_unit / price_per_token / price_per_request
- number_of_tokens / number_of_requests
- base_amount
- line_total_amount
- subtotal
- discount / discount_percent
- tax / tax_percent
- adjustments / credits
- total
- amount_due
- payment_status
- link_to_pay / pay_online_url
Only include values that are explicitly stated. Do not include any items with a $0 total
unless they explicitly reference LLM usage, token counts, or named models like Llama.
After extracting data, analyze it and extend the result with these fields. Think carefully
and try to get a summary of expenses in the invoice that are related to Llama, LLM or inference:
- total_spent_on_llm or total_spent_on_inference
- total_spent_on_llama
- total_llama_tokens_used
- total_llm_tokens_used
- total_spent_by_provider (e.g. {"OpenAI": 12.50, "Grok": 5.00})
If the JSON output is malformed or partially invalid, attempt to fix it and return valid JSON."#;
