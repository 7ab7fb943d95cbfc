use rand::seq::SliceRandom;

/// Sent in place of a reply when generation fails.
pub const FALLBACK_RESPONSES: [&str; 5] = [
    "Please try re-phrasing, I am likely having some trouble with that question.",
    "I will get better with time, please try with a different question.",
    "I wasn't able to process your input. Let's try something else.",
    "Something went wrong. Could you try again in a few seconds with a different question?",
    "Oops, that proved a tad difficult for me, can you retry with another question?",
];

pub fn pick_fallback() -> &'static str {
    FALLBACK_RESPONSES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_RESPONSES[0])
}

/// Word-sized chunks that mimic a streamed reply.
pub fn fallback_chunks(sentence: &str) -> Vec<String> {
    sentence.split_whitespace().map(|word| format!("{word} ")).collect()
}
