use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::GrayImage;

use super::preprocess::encode_png;
use super::types::{NormalizedImage, OcrEngine, OcrLine, OcrResult, OcrToken};
use super::ExtractionError;

/// Languages used when the caller gives no hint.
pub const DEFAULT_OCR_LANGUAGES: &str = "fra+eng";

/// Characters Tesseract may emit: digits, Latin letters, French accented
/// letters and the punctuation found in amounts, dates and references.
const CHAR_WHITELIST: &str = "0123456789\
ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\
ÀÂÆÇÉÈÊËÏÎÔŒÙÛÜŸàâæçéèêëïîôœùûüÿ.,/-";

const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════
// Adapter
// ═══════════════════════════════════════════════════════════

/// Runs an `OcrEngine` over a normalized image and reports per-token confidence.
pub struct OcrAdapter {
    engine: Box<dyn OcrEngine + Send + Sync>,
    default_lang: String,
}

impl OcrAdapter {
    pub fn new(engine: Box<dyn OcrEngine + Send + Sync>, default_lang: &str) -> Self {
        Self {
            engine,
            default_lang: default_lang.to_string(),
        }
    }

    pub fn recognize(
        &self,
        image: &NormalizedImage,
        lang: Option<&str>,
    ) -> Result<OcrResult, ExtractionError> {
        let lang = lang.unwrap_or(&self.default_lang);
        let text = self.engine.recognize_text(&image.image, lang)?;
        let tokens = self.engine.recognize_tokens(&image.image, lang)?;

        let lines = tokens
            .into_iter()
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| OcrLine {
                confidence: parse_confidence(&t.confidence),
                text: t.text,
            })
            .collect();

        Ok(OcrResult { text, lines })
    }
}

/// Engine confidence string → [0, 1].
///
/// Only integer percentages are understood. Anything unparseable, and the
/// engine's negative "unknown" marker, become 0.0.
pub fn parse_confidence(raw: &str) -> f32 {
    match raw.trim().parse::<i64>() {
        Ok(value) if value >= 0 => (value as f32 / 100.0).min(1.0),
        _ => 0.0,
    }
}

// ═══════════════════════════════════════════════════════════
// Tesseract CLI engine
// ═══════════════════════════════════════════════════════════

/// Drives the `tesseract` executable over PNG on stdin.
///
/// Every invocation is bounded by `timeout`; an overrun kills the process.
pub struct TesseractEngine {
    command: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }

    fn run(&self, image: &GrayImage, lang: &str, tsv: bool) -> Result<String, ExtractionError> {
        let png = encode_png(image)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(["stdin", "stdout", "-l", lang, "--oem", "3", "--psm", "6", "-c"])
            .arg(format!("tessedit_char_whitelist={CHAR_WHITELIST}"));
        if tsv {
            cmd.arg("tsv");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            ExtractionError::OcrProcessing(format!("cannot start '{}': {e}", self.command))
        })?;

        // Feed and drain on helper threads so a full pipe never stalls the child.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractionError::OcrProcessing("stdin unavailable".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractionError::OcrProcessing("stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractionError::OcrProcessing("stderr unavailable".into()))?;

        let writer = std::thread::spawn(move || stdin.write_all(&png));
        let out_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(
                    command = %self.command,
                    timeout_secs = self.timeout.as_secs(),
                    "Tesseract exceeded its deadline, killed"
                );
                return Err(ExtractionError::OcrTimeout(self.timeout.as_secs()));
            }
            std::thread::sleep(PROCESS_POLL_INTERVAL);
        };

        let _ = writer.join();
        let output = out_reader
            .join()
            .map_err(|_| ExtractionError::OcrProcessing("stdout reader panicked".into()))??;
        let diagnostics = err_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(ExtractionError::OcrProcessing(format!(
                "tesseract exited with {status}: {}",
                diagnostics.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize_text(&self, image: &GrayImage, lang: &str) -> Result<String, ExtractionError> {
        self.run(image, lang, false)
    }

    fn recognize_tokens(
        &self,
        image: &GrayImage,
        lang: &str,
    ) -> Result<Vec<OcrToken>, ExtractionError> {
        let tsv = self.run(image, lang, true)?;
        Ok(parse_tsv_tokens(&tsv))
    }
}

/// Parse Tesseract TSV output into word tokens.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Fractional confidences are truncated to
/// whole percentages; -1 is passed through.
fn parse_tsv_tokens(tsv: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let raw_conf = fields[10].trim();
        let confidence = match raw_conf.parse::<f64>() {
            Ok(c) => (c.trunc() as i64).to_string(),
            Err(_) => raw_conf.to_string(),
        };

        tokens.push(OcrToken {
            text: fields[11].to_string(),
            confidence,
        });
    }

    tokens
}

// ── Mock for testing ──────────────────────────────────────

/// Mock OCR engine for unit testing without Tesseract.
///
/// Every whitespace-separated word of `text` becomes a token carrying
/// `confidence` verbatim. Counts `recognize_text` calls.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: String,
    fail: bool,
    /// Per-call answers; `None` fails that call. Empty means use `text`.
    script: Vec<Option<String>>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: &str) -> Self {
        Self {
            text: text.to_string(),
            confidence: confidence.to_string(),
            fail: false,
            script: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// An engine answering call `n` with `script[n]`, failing where it is `None`.
    pub fn scripted(script: &[Option<&str>]) -> Self {
        Self {
            script: script.iter().map(|s| s.map(str::to_string)).collect(),
            ..Self::new("", "90")
        }
    }

    /// Answer for the 0-based call `n`.
    fn answer(&self, n: usize) -> Result<String, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::OcrProcessing("mock engine failure".into()));
        }
        if self.script.is_empty() {
            return Ok(self.text.clone());
        }
        self.script
            .get(n)
            .cloned()
            .flatten()
            .ok_or_else(|| ExtractionError::OcrProcessing(format!("mock engine failure on call {n}")))
    }

    /// An engine whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("", "0")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize_text(&self, _image: &GrayImage, _lang: &str) -> Result<String, ExtractionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer(n)
    }

    fn recognize_tokens(
        &self,
        _image: &GrayImage,
        _lang: &str,
    ) -> Result<Vec<OcrToken>, ExtractionError> {
        let text = self.answer(self.calls().saturating_sub(1))?;
        Ok(text
            .split_whitespace()
            .map(|w| OcrToken {
                text: w.to_string(),
                confidence: self.confidence.clone(),
            })
            .collect())
    }
}

/// Shares one engine between adapters (tests keep a handle for call counts).
impl<T: OcrEngine + ?Sized> OcrEngine for std::sync::Arc<T> {
    fn recognize_text(&self, image: &GrayImage, lang: &str) -> Result<String, ExtractionError> {
        (**self).recognize_text(image, lang)
    }

    fn recognize_tokens(
        &self,
        image: &GrayImage,
        lang: &str,
    ) -> Result<Vec<OcrToken>, ExtractionError> {
        (**self).recognize_tokens(image, lang)
    }
}
