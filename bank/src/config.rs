//! Node table parsing and group configuration.
//!
//! The node table lists the group, one member per line, after a count:
//!
//! ```text
//! 3
//! node1 sp21-cs425-g01-01.cs.illinois.edu 1234
//! node2 10.0.0.2 1234
//! node3 localhost 1235
//! ```

use {
    crate::error::{BankError, Result},
    groupcast_multicast::{GroupConfig, Node},
    std::{
        net::{Ipv4Addr, SocketAddr},
        path::Path,
    },
    tokio::{fs, net::lookup_host},
};

/// Parse a node table, resolving every host.
pub async fn parse_node_table(text: &str) -> Result<Vec<Node>> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty());

    let (_, count_line) = lines
        .next()
        .ok_or_else(|| BankError::Config("empty node table".to_string()))?;
    let count: usize = count_line
        .parse()
        .map_err(|_| BankError::Config(format!("bad node count [{count_line}]")))?;

    let mut nodes = Vec::with_capacity(count);
    for (index, line) in lines {
        let lineno = index.saturating_add(1);
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, host, port] = fields.as_slice() else {
            return Err(BankError::Config(format!(
                "line {lineno}: expected `<id> <host> <port>`, got [{line}]"
            )));
        };
        let port: u16 = port
            .parse()
            .map_err(|_| BankError::Config(format!("line {lineno}: bad port [{port}]")))?;
        let addr = resolve(host, port)
            .await
            .map_err(|e| BankError::Config(format!("line {lineno}: {e}")))?;
        nodes.push(Node::new(*id, addr));
    }

    if nodes.len() != count {
        return Err(BankError::Config(format!(
            "header says {count} nodes, found {}",
            nodes.len()
        )));
    }
    Ok(nodes)
}

pub async fn load_node_table(path: &Path) -> Result<Vec<Node>> {
    parse_node_table(&fs::read_to_string(path).await?).await
}

async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    let mut addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    // Prefer IPv4, as the listener binds 0.0.0.0.
    addrs.sort_by_key(|addr| !addr.is_ipv4());
    addrs.into_iter().next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("host [{host}] resolved to no address"),
        )
    })
}

/// Group configuration for `node_id` listening on every interface at `port`.
///
/// If the table does not list the node itself, it is reached over loopback.
pub fn group_config(node_id: &str, port: u16, mut members: Vec<Node>) -> GroupConfig {
    if !members.iter().any(|node| node.id == node_id) {
        members.push(Node::new(
            node_id,
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        ));
    }
    GroupConfig::new(
        node_id,
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        members,
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches, std::io::Write};

    #[tokio::test]
    async fn test_parse_table() {
        let nodes = parse_node_table("2\nnode1 127.0.0.1 1234\n\nnode2 localhost 1235\n")
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0], Node::new("node1", "127.0.0.1:1234".parse().unwrap()));
        assert_eq!(nodes[1].id, "node2");
        assert_eq!(nodes[1].addr.port(), 1235);
    }

    #[tokio::test]
    async fn test_parse_errors() {
        for text in [
            "",
            "two\nnode1 127.0.0.1 1",
            "2\nnode1 127.0.0.1 1",
            "1\nnode1 127.0.0.1",
            "1\nnode1 127.0.0.1 99999",
        ] {
            assert_matches!(parse_node_table(text).await, Err(BankError::Config(_)), "{text:?}");
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1").unwrap();
        writeln!(file, "node1 127.0.0.1 4000").unwrap();
        let nodes = load_node_table(file.path()).await.unwrap();
        assert_eq!(nodes[0].addr, "127.0.0.1:4000".parse().unwrap());

        assert_matches!(
            load_node_table(Path::new("/definitely/not/here")).await,
            Err(BankError::Io(_))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_resolve_on_runtime_thread() {
        let addr = resolve("localhost", 4000).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4000);
        assert_matches!(resolve("no-such-host.invalid", 4000).await, Err(_));
    }

    #[test]
    fn test_group_config_adds_self() {
        let others = vec![Node::new("node2", "127.0.0.1:4001".parse().unwrap())];
        let config = group_config("node1", 4000, others);
        assert_eq!(config.bind_addr, "0.0.0.0:4000".parse().unwrap());
        let membership = config.membership();
        assert_eq!(membership.len(), 2);
        assert!(membership
            .iter()
            .any(|n| n.id == "node1" && n.addr == "127.0.0.1:4000".parse().unwrap()));

        let listed = vec![Node::new("node1", "10.0.0.1:4000".parse().unwrap())];
        let config = group_config("node1", 4000, listed);
        assert_eq!(config.membership()[0].addr, "10.0.0.1:4000".parse().unwrap());
    }
}
