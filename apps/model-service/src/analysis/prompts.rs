// Prompt constants for résumé screening.
// The grammar is fixed so prompt length depends only on page count and the job text.

/// System instruction for the screening model.
pub const SCREENING_SYSTEM: &str = "You are an experienced technical recruiter screening résumés. \
    You will receive the pages of one candidate's résumé as images, followed by a job description. \
    Extract the candidate's full name and email address exactly as written on the résumé. \
    Decide one outcome: \
    - \"Shortlisted\": the candidate clearly meets the core requirements of the job. \
    - \"Rejected\": the candidate clearly lacks the core requirements. \
    - \"Needs Review\": the evidence is mixed or incomplete and a human should decide. \
    - \"Invalid\": the document is not a résumé, is unreadable, or is empty. \
    Give a one or two sentence reason grounded in what the résumé actually says. \
    If the name or email is missing, use an empty string. \
    You MUST respond with a single JSON object with the keys name, email, outcome, reason. \
    Do NOT include any text outside the JSON object.";

/// One placeholder per résumé page, in page order.
pub const IMAGE_PLACEHOLDER: &str = "<|vision_bos|><|IMAGE|><|vision_eos|>\n";

/// Prefix for the job context that follows the page placeholders.
pub const JOB_CONTEXT_PREFIX: &str = "Here is the job description: ";

/// Renders the full prompt for `page_count` pages and a job description.
pub fn build_prompt(page_count: usize, job_description: &str) -> String {
    let mut prompt = String::with_capacity(
        SCREENING_SYSTEM.len() + IMAGE_PLACEHOLDER.len() * page_count + job_description.len() + 128,
    );
    prompt.push_str("<|im_start|>system\n");
    prompt.push_str(SCREENING_SYSTEM);
    prompt.push_str("<|im_end|>\n");
    prompt.push_str("<|im_start|>user\n");
    for _ in 0..page_count {
        prompt.push_str(IMAGE_PLACEHOLDER);
    }
    prompt.push_str(JOB_CONTEXT_PREFIX);
    prompt.push_str(job_description);
    prompt.push_str("<|im_end|>\n");
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}
