//! 带内标记过滤：从流式文本中剥离 `[GENERATE_IMAGE: 描述]`
//!
//! 标记可能被拆到多个片段中，过滤器从 '[' 开始缓冲，直到能判定它不是标记前缀（原样输出）
//! 或读到 ']'（解析后丢弃）。原始标记文本永远不会转发给客户端。格式不正确的标记直接丢弃。

use std::sync::OnceLock;

use regex::Regex;

const MARKER_OPEN: &str = "[GENERATE_IMAGE";

/// 单个标记的最大长度（超过即视为格式错误并丢弃到下一个 ']'）
const MAX_MARKER_LEN: usize = 512;

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| Regex::new(r"^\[GENERATE_IMAGE:\s*([^\]]*?)\s*\]$").unwrap())
}

/// 从标记中解析出的素材请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub description: String,
}

/// 一次 push / finish 的结果：可转发的文本 + 新解析出的素材请求
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    pub text: String,
    pub assets: Vec<AssetRequest>,
}

/// 增量标记过滤器
#[derive(Debug, Default)]
pub struct MarkerFilter {
    pending: String,
    /// 超长标记：丢弃输入直到 ']'
    discarding: bool,
}

impl MarkerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一个片段，返回可以立即转发的部分
    pub fn push(&mut self, fragment: &str) -> Filtered {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(fragment);

        let mut out = Filtered::default();
        let mut rest: &str = &buf;

        if self.discarding {
            match rest.find(']') {
                Some(end) => {
                    self.discarding = false;
                    rest = &rest[end + 1..];
                }
                None => return out,
            }
        }

        loop {
            let Some(open) = rest.find('[') else {
                out.text.push_str(rest);
                break;
            };
            out.text.push_str(&rest[..open]);
            let candidate = &rest[open..];

            if candidate.len() < MARKER_OPEN.len() && MARKER_OPEN.starts_with(candidate) {
                // 可能是标记开头，等下一个片段
                self.pending = candidate.to_string();
                break;
            }
            if !candidate.starts_with(MARKER_OPEN) {
                out.text.push('[');
                rest = &candidate[1..];
                continue;
            }

            match candidate.find(']') {
                Some(end) => {
                    if let Some(asset) = parse_marker(&candidate[..=end]) {
                        out.assets.push(asset);
                    } else {
                        tracing::debug!(marker = &candidate[..=end], "dropping malformed marker");
                    }
                    rest = &candidate[end + 1..];
                }
                None if candidate.len() > MAX_MARKER_LEN => {
                    tracing::debug!("dropping oversized marker");
                    self.discarding = true;
                    break;
                }
                None => {
                    self.pending = candidate.to_string();
                    break;
                }
            }
        }
        out
    }

    /// 流结束：未闭合的标记丢弃，仅是前缀的普通文本（如 "[GEN"）原样输出
    pub fn finish(&mut self) -> Filtered {
        let pending = std::mem::take(&mut self.pending);
        self.discarding = false;
        if pending.starts_with(MARKER_OPEN) {
            tracing::debug!("dropping unterminated marker at end of stream");
            return Filtered::default();
        }
        Filtered {
            text: pending,
            assets: Vec::new(),
        }
    }
}

fn parse_marker(marker: &str) -> Option<AssetRequest> {
    let caps = marker_re().captures(marker)?;
    let description = caps.get(1)?.as_str().trim();
    if description.is_empty() {
        return None;
    }
    Some(AssetRequest {
        description: description.to_string(),
    })
}

/// 对完整文本一次性剥离标记
pub fn strip_markers(text: &str) -> Filtered {
    let mut filter = MarkerFilter::new();
    let mut out = filter.push(text);
    let tail = filter.finish();
    out.text.push_str(&tail.text);
    out.assets.extend(tail.assets);
    out
}
