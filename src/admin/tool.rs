//! HTTP-capable tools that may exist inside a task's container.

/// A way of issuing an HTTP request from inside a container.
///
/// Variants are declared in preference order: full clients first, then
/// scripting one-liners, then raw sockets (no TLS, no redirects, and the
/// response has to be parsed by hand).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpTool {
    /// `curl -s`
    Curl,
    /// `wget -qO-`
    Wget,
    /// `python3` with `urllib.request`
    Python3,
    /// `node` with the `http` module
    Node,
    /// `bash` with `/dev/tcp`
    BashTcp,
}

impl HttpTool {
    /// All tools, most preferred first.
    pub const ALL: [HttpTool; 5] = [
        HttpTool::Curl,
        HttpTool::Wget,
        HttpTool::Python3,
        HttpTool::Node,
        HttpTool::BashTcp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpTool::Curl => "curl",
            HttpTool::Wget => "wget",
            HttpTool::Python3 => "python3",
            HttpTool::Node => "node",
            HttpTool::BashTcp => "bash",
        }
    }

    /// Whether this tool returns unparsed HTTP (status line, headers, framing).
    pub fn returns_raw_http(&self) -> bool {
        matches!(self, HttpTool::BashTcp)
    }
}

impl std::fmt::Display for HttpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
