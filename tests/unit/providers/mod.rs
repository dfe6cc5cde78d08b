/*!
 * Translator adapter tests against mocked HTTP endpoints
 */

pub mod anthropic_test;
pub mod openai_test;
