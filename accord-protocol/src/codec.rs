use accord_core::{ChatMessage, DiscussionConfig, Role, TranscriptMessage};

const ROLE_A_SYSTEM_PROMPT: &str = "You are Model A, a direct problem-solver in a two-model \
discussion. Your task is to analyze the following problem and produce a clear, well-reasoned \
analysis of 200 to 400 words. Be concrete and avoid hedging; state your position and the \
reasoning behind it.\n\nProblem:\n{problem}";

const ROLE_B_SYSTEM_PROMPT: &str = "You are Model B, a critical evaluator in a two-model \
discussion. You will receive an analysis produced by Model A for the problem below. Evaluate it \
rigorously: identify weaknesses, propose alternatives where warranted, and produce your own \
200 to 400 word response. Be concrete and avoid hedging.\n\nProblem:\n{problem}";

const CONSENSUS_SYSTEM_PROMPT: &str = "You are evaluating whether the discussion above has \
produced a solid, agreed-upon solution to the problem. Reply using exactly this format, with no \
additional commentary outside it:\n\n\
[CONSENSUS_CHECK]\n\
HAS_CONSENSUS: <YES|NO>\n\
[CONFIDENCE]\n\
<integer 0..100>\n\
[REASONING]\n\
<free text>\n\
[PROPOSED_SOLUTION]\n\
<free text, or literally \"No consensus yet.\">";

const REFORMAT_INSTRUCTION: &str = "Please provide your response in the exact structured format \
requested, starting with [CONSENSUS_CHECK].";

fn history_to_messages(history: &[TranscriptMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| ChatMessage::assistant(m.content.clone()))
        .collect()
}

/// Build the system prompt and message list for a single turn.
///
/// When `message_history` is empty this is the opening turn of round 1 and an
/// "initial" instruction is appended; otherwise a "follow-up" instruction
/// carrying the round number is used.
pub fn build_turn_messages(
    role: Role,
    config: &DiscussionConfig,
    current_round: u32,
    message_history: &[TranscriptMessage],
) -> (String, Vec<ChatMessage>) {
    let template = match role {
        Role::A => ROLE_A_SYSTEM_PROMPT,
        Role::B => ROLE_B_SYSTEM_PROMPT,
    };
    let system_prompt = template.replace("{problem}", &config.prompt);

    let mut messages = history_to_messages(message_history);
    let instruction = if message_history.is_empty() {
        format!(
            "Provide your initial analysis of the following problem:\n\n{}",
            config.prompt
        )
    } else {
        match role {
            Role::A => format!(
                "Round {}: consider Model B's previous response above and refine or defend your \
                 position.",
                current_round
            ),
            Role::B => format!(
                "Round {}: consider Model A's previous response above and respond with your own \
                 evaluation.",
                current_round
            ),
        }
    };
    messages.push(ChatMessage::user(instruction));
    (system_prompt, messages)
}

/// Build the system prompt and message list for a consensus-check request.
///
/// `retry_instructions` holds the reformat nudges appended by prior failed
/// attempts in this round (see `accord_protocol::MAX_CONSENSUS_RETRIES`); pass
/// an empty slice on the first attempt.
pub fn build_consensus_messages(
    message_history: &[TranscriptMessage],
    retry_attempts: u32,
) -> (String, Vec<ChatMessage>) {
    let mut messages = history_to_messages(message_history);
    messages.push(ChatMessage::user(
        "Based on the discussion above, evaluate whether consensus has been reached.",
    ));
    for _ in 0..retry_attempts {
        messages.push(ChatMessage::user(REFORMAT_INSTRUCTION));
    }
    (CONSENSUS_SYSTEM_PROMPT.to_string(), messages)
}
