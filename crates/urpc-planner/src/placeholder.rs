//! Placeholder resolution.
//!
//! Model output cannot know the ids a create will mint, so it writes
//! `generated-id` where a fresh id belongs and `user-id` where a later step
//! refers back to the user created earlier in the same plan.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};
use urpc_core::{now_millis, ExecutionPlan, Step};

use crate::decoder::PseudoCodeDecoder;

/// Marker for a fresh identifier.
pub const GENERATED_ID: &str = "generated-id";

/// Marker for the id of the user created earlier in the plan.
pub const USER_ID: &str = "user-id";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 8;

/// Source of fresh record identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Base-36 millisecond timestamp followed by a base-36 random suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampIdGenerator;

impl IdGenerator for TimestampIdGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        format!("{}{}", to_base36(now_millis().max(0) as u64), suffix)
    }
}

/// Render `n` in lowercase base 36.
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Accumulator threaded through one resolution pass.
#[derive(Debug, Default)]
struct Resolution {
    steps: Vec<Step>,
    session_user_id: Option<String>,
}

/// Substitutes placeholders across a whole plan, once, before execution.
#[derive(Clone)]
pub struct PlaceholderResolver {
    decoder: PseudoCodeDecoder,
    ids: Arc<dyn IdGenerator>,
}

impl Default for PlaceholderResolver {
    fn default() -> Self {
        Self::new(PseudoCodeDecoder::default())
    }
}

impl PlaceholderResolver {
    pub fn new(decoder: PseudoCodeDecoder) -> Self {
        Self {
            decoder,
            ids: Arc::new(TimestampIdGenerator),
        }
    }

    /// Use a custom id source.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Resolve every placeholder in `plan`.
    ///
    /// Steps are visited in ascending `order`, which is also the order of the
    /// returned plan. `total_steps` is carried over untouched.
    pub fn resolve(&self, plan: &ExecutionPlan) -> ExecutionPlan {
        let resolution = plan
            .ordered_steps()
            .into_iter()
            .fold(Resolution::default(), |acc, step| self.resolve_step(acc, step));

        if let Some(user_id) = &resolution.session_user_id {
            debug!(user_id = %user_id, "resolved session user id");
        }

        ExecutionPlan {
            steps: resolution.steps,
            total_steps: plan.total_steps,
        }
    }

    fn resolve_step(&self, mut acc: Resolution, step: &Step) -> Resolution {
        let mut code = step.urpc_code.clone();

        if code.contains(GENERATED_ID) {
            let header = self.decoder.decode_header(&code);
            if header.operation.map_or(false, |op| op.is_create_family()) {
                let id = self.ids.generate();
                code = code.replace(GENERATED_ID, &id);
                if acc.session_user_id.is_none() && header.entity.to_lowercase().contains("user") {
                    acc.session_user_id = Some(id);
                }
            }
        }

        if code.contains(USER_ID) {
            match &acc.session_user_id {
                Some(user_id) => code = code.replace(USER_ID, user_id),
                None => warn!(
                    order = step.order,
                    "user-id placeholder has no preceding user create; left unresolved"
                ),
            }
        }

        acc.steps.push(Step {
            urpc_code: code,
            ..step.clone()
        });
        acc
    }
}
