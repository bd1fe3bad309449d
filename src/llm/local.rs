use std::num::NonZeroU32;
use std::path::Path;
use std::pin::pin;
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use serde_json::Value;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use super::{parse_structured, BackendConfig, ChatMessage, GenerationError, Generator};

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

pub struct LocalConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Maximum tokens to generate per completion. Dialog trees are long.
    pub max_tokens: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8192,
            max_tokens: 4096,
        }
    }
}

fn build_sampler(temperature: f32) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(temperature),
        LlamaSampler::dist(1234),
    ])
}

fn backend_err<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> GenerationError {
    move |e| GenerationError::Backend(format!("{what}: {e}"))
}

// ---------------------------------------------------------------------------
// LocalModel: loaded GGUF handle
// ---------------------------------------------------------------------------

/// In-process generator. Sampling is unconstrained, so the schema is
/// handed to the model as an instruction and the reply is parsed leniently.
pub struct LocalModel {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    name: String,
    n_ctx: u32,
    max_tokens: usize,
    timeout: Duration,
    temperature: f32,
}

impl LocalModel {
    pub fn load(config: &BackendConfig, local: LocalConfig) -> Result<Self, GenerationError> {
        let model_path = config.model.as_str();
        if !Path::new(model_path).is_file() {
            return Err(GenerationError::ModelNotFound(model_path.to_string()));
        }

        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().map_err(|e| GenerationError::BackendUnavailable(e.to_string()))?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            local.n_gpu_layers, local.n_ctx, local.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(local.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .map_err(|e| GenerationError::BackendUnavailable(e.to_string()))?,
        ));

        info!("Model loaded successfully");

        let n_ctx = NonZeroU32::new(local.n_ctx)
            .ok_or_else(|| GenerationError::Backend("n_ctx must be > 0".into()))?;
        let ctx = model
            .new_context(backend, LlamaContextParams::default().with_n_ctx(Some(n_ctx)))
            .map_err(|e| GenerationError::BackendUnavailable(e.to_string()))?;

        Ok(Self {
            backend,
            model,
            ctx,
            name: model_path.to_string(),
            n_ctx: local.n_ctx,
            max_tokens: local.max_tokens,
            timeout: config.timeout,
            temperature: config.temperature,
        })
    }

    /// Core generation: tokenize messages, feed prompt, sample tokens until
    /// end-of-generation, the token cap, or the deadline.
    fn generate_text(&mut self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let deadline = Instant::now() + self.timeout;
        self.ctx.clear_kv_cache();

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_err("failed to create chat messages"))?;

        let tmpl = self
            .model
            .chat_template(None)
            .map_err(backend_err("model has no chat template"))?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .map_err(backend_err("failed to apply chat template"))?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(backend_err("tokenization failed"))?;
        if tokens.is_empty() {
            return Err(GenerationError::Backend("empty prompt".into()));
        }

        info!("Prompt tokenized: {} tokens", tokens.len());

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch
                .add(*tok, i, &[0], i == last_idx)
                .map_err(backend_err("batch add failed"))?;
        }
        self.ctx
            .decode(&mut batch)
            .map_err(backend_err("initial decode failed"))?;

        let mut sampler = build_sampler(self.temperature);
        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..self.max_tokens {
            if Instant::now() > deadline {
                return Err(GenerationError::Timeout(self.timeout));
            }

            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .map_err(backend_err("token_to_piece failed"))?;
            output.push_str(&piece);

            batch.clear();
            batch
                .add(tok, n_cur, &[0], true)
                .map_err(backend_err("batch add failed"))?;
            self.ctx
                .decode(&mut batch)
                .map_err(backend_err("decode step failed"))?;
            n_cur += 1;
        }

        info!(
            "=== LLM RAW OUTPUT ({} chars) ===\n{}\n=== END OUTPUT ===",
            output.len(),
            output
        );

        Ok(output)
    }
}

impl Generator for LocalModel {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value, GenerationError> {
        info!("=== LLM CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        let mut prompted = Vec::with_capacity(messages.len() + 1);
        prompted.extend_from_slice(messages);
        prompted.push(ChatMessage::system(format!(
            "Reply with JSON only, matching this JSON schema:\n{schema}"
        )));

        let raw = self.generate_text(&prompted)?;
        parse_structured(&raw)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
