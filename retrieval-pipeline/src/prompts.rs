//! Prompt templates shared by every strategy.

/// New-token budget for final answers.
pub const ANSWER_MAX_NEW_TOKENS: usize = 32;
/// New-token budget for the filter's reasoning chain.
pub const REASONING_MAX_NEW_TOKENS: usize = 1000;
/// New-token budget for a single relevance verdict.
pub const VERDICT_MAX_NEW_TOKENS: usize = 32;
/// New-token budget for citation extraction.
pub const EXTRACTION_MAX_NEW_TOKENS: usize = 1000;

const ANSWER_INSTRUCTION: &str = "Answer the question based on the given passages. \
Only give me the answer and do not output any other words.";

/// Answer prompt over `content`. The instruction is stated before and after the
/// passages so it survives head/tail truncation.
pub fn answer_prompt(content: &str, question: &str) -> String {
    format!(
        "{ANSWER_INSTRUCTION}\n\nThe following are given passages.\n{content}\n\n{ANSWER_INSTRUCTION}\n\nQuestion: {question}\nAnswer:"
    )
}

/// Answer prompt without any retrieved evidence.
pub fn direct_answer_prompt(question: &str) -> String {
    format!(
        "Answer the question. Only give me the answer and do not output any other words.\n\nQuestion: {question}\nAnswer:"
    )
}

pub fn reasoning_prompt(passages: &[String], question: &str) -> String {
    let content = passages.join("\n");
    format!(
        "{content}\n\nPlease combine the above information and give your thinking process for the following question:{question}."
    )
}

pub fn verdict_prompt(passage: &str, question: &str, reasoning: &str) -> String {
    format!(
        "Given an article:{passage}\nQuestion: {question}.\nThought process:{reasoning}.\n\
Your task is to use the thought process provided to decide whether you need to cite the article to answer this question. \
If you need to cite the article, set the status value to True. If not, set the status value to False. \
Please output the response in the following json format: {{\"status\": \"{{the value of status}}\"}}"
    )
}

pub fn extraction_prompt(documents: &[String], question: &str) -> String {
    let content = documents.concat();
    format!(
        "{content}.\n\nBased on the above background, please output the information you need to cite to answer the question below.\n{question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_prompt_repeats_instruction_around_passages() {
        let prompt = answer_prompt("P1P2", "Who?");
        assert_eq!(prompt.matches(ANSWER_INSTRUCTION).count(), 2);
        assert!(prompt.contains("The following are given passages.\nP1P2\n\n"));
        assert!(prompt.ends_with("Question: Who?\nAnswer:"));
    }

    #[test]
    fn verdict_prompt_asks_for_json_status() {
        let prompt = verdict_prompt("doc", "q", "because");
        assert!(prompt.starts_with("Given an article:doc\nQuestion: q.\nThought process:because."));
        assert!(prompt.ends_with(r#"{"status": "{the value of status}"}"#));
    }

    #[test]
    fn reasoning_and_extraction_join_differently() {
        let passages = vec!["a".to_string(), "b".to_string()];
        assert!(reasoning_prompt(&passages, "q").starts_with("a\nb\n\n"));
        assert!(extraction_prompt(&passages, "q").starts_with("ab.\n\n"));
    }
}
