//! In-container command lines for admin requests.
//!
//! Each [`HttpTool`] has exactly one GET template and one POST template. The
//! templates target the namespace-local admin address, which is only
//! reachable from tasks sharing the sidecar's network namespace.

use crate::admin::tool::HttpTool;

/// Namespace-local address the Envoy admin listener binds to under Nomad.
pub const ADMIN_HOST: &str = "127.0.0.2";

const NODE_GET_CALLBACK: &str = r#"function(r){var d=[];r.on("data",function(c){d.push(c)});r.on("end",function(){process.stdout.write(Buffer.concat(d))})}).on("error",function(){process.exit(1)})"#;

const NODE_POST_CALLBACK: &str =
    r#"function(res){res.resume()});r.on("error",function(){process.exit(1)});r.end()"#;

fn admin_url(port: u16, path: &str) -> String {
    format!("http://{}:{}{}", ADMIN_HOST, port, path)
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Build the command for a GET against the admin interface.
///
/// Every tool except [`HttpTool::BashTcp`] writes only the response body to
/// stdout; the raw-socket variant writes the full HTTP response.
pub fn build_get(tool: HttpTool, port: u16, path: &str) -> Vec<String> {
    let url = admin_url(port, path);
    match tool {
        HttpTool::Curl => argv(["curl", "-s", url.as_str()]),
        HttpTool::Wget => argv(["wget", "-qO-", url.as_str()]),
        HttpTool::Python3 => {
            let script = format!(
                r#"import urllib.request,sys;sys.stdout.buffer.write(urllib.request.urlopen("{}").read())"#,
                url
            );
            argv(["python3", "-c", script.as_str()])
        }
        HttpTool::Node => {
            let script = format!(
                r#"var http=require("http");http.get("{}",{}"#,
                url, NODE_GET_CALLBACK
            );
            argv(["node", "-e", script.as_str()])
        }
        HttpTool::BashTcp => {
            let script = format!(
                r#"exec 3<>/dev/tcp/{}/{}; echo -e "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n" >&3; cat <&3"#,
                ADMIN_HOST, port, path
            );
            argv(["bash", "-c", script.as_str()])
        }
    }
}

/// Build the command for a body-less POST against the admin interface.
pub fn build_post(tool: HttpTool, port: u16, path: &str) -> Vec<String> {
    let url = admin_url(port, path);
    match tool {
        HttpTool::Curl => argv(["curl", "-s", "-X", "POST", url.as_str()]),
        HttpTool::Wget => argv(["wget", "-qO-", "--post-data=", url.as_str()]),
        HttpTool::Python3 => {
            let script = format!(
                r#"import urllib.request;urllib.request.urlopen(urllib.request.Request("{}",data=b"",method="POST"))"#,
                url
            );
            argv(["python3", "-c", script.as_str()])
        }
        HttpTool::Node => {
            let script = format!(
                r#"var http=require("http");var r=http.request({{hostname:"{}",port:{},path:"{}",method:"POST"}},{}"#,
                ADMIN_HOST, port, path, NODE_POST_CALLBACK
            );
            argv(["node", "-e", script.as_str()])
        }
        HttpTool::BashTcp => {
            let script = format!(
                r#"exec 3<>/dev/tcp/{}/{}; echo -e "POST {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n" >&3; cat <&3"#,
                ADMIN_HOST, port, path
            );
            argv(["bash", "-c", script.as_str()])
        }
    }
}
