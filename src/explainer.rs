use crate::model_client::{ChatBackend, FragmentStream, GenerationProfile, ModelClient, ModelError};

pub const COMMAND_SYSTEM_PROMPT: &str = "You are a Linux expert. \
Return ONLY one short safe Linux command. \
No explanation, no backticks, max 20 tokens.";

pub const EXPLAIN_SYSTEM_PROMPT: &str = "Explain the result briefly in simple terms.";

/// User prompt for the explanation call. All three values go in verbatim.
pub fn explanation_prompt(request: &str, command: &str, output: &str) -> String {
    format!("Request: {request}\nCommand: {command}\nOutput:\n{output}")
}

pub fn explain<'a, B: ChatBackend>(
    client: &'a ModelClient<B>,
    profile: &GenerationProfile,
    request: &str,
    command: &str,
    output: &str,
) -> Result<FragmentStream<'a>, ModelError> {
    client.generate(profile, &explanation_prompt(request, command, output))
}
