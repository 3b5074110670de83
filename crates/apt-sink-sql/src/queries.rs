//! Per-table query functions: one function per statement rather than a
//! repository object.

use apt_common::model::{AptEvent, AttackAlert, AttackEdge, AttackNode, EventKind, EventMetadata, Phase, TcpFlow};
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlConnection;
use sqlx::MySql;

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    source_ip: String,
    dest_ip: String,
    event_name: String,
    event_type: String,
    severity: i32,
    description: String,
    src_port: Option<i32>,
    dest_port: Option<i32>,
    bytes_sent: Option<i64>,
    bytes_received: Option<i64>,
    status_code: Option<i32>,
    protocol: Option<i32>,
}

impl EventRow {
    fn into_event(self) -> Option<AptEvent> {
        let event_name = EventKind::from_str(&self.event_name)?;
        let event_type = Phase::from_str(&self.event_type)?;
        Some(AptEvent {
            id: self.id.parse().ok()?,
            start_time: self.start_time,
            end_time: self.end_time,
            source_ip: self.source_ip,
            dest_ip: self.dest_ip,
            event_name,
            event_type,
            severity: self.severity as u8,
            description: self.description,
            metadata: EventMetadata {
                src_port: self.src_port,
                dest_port: self.dest_port,
                bytes_sent: self.bytes_sent,
                bytes_received: self.bytes_received,
                status_code: self.status_code,
                protocol: self.protocol,
            },
        })
    }
}

pub async fn insert_event(conn: &mut MySqlConnection, event: &AptEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO apt_events
        (id, start_time, end_time, source_ip, dest_ip, event_name, event_type, severity,
         description, src_port, dest_port, bytes_sent, bytes_received, status_code, protocol)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(&event.source_ip)
    .bind(&event.dest_ip)
    .bind(event.event_name.as_str())
    .bind(event.event_type.as_str())
    .bind(event.severity as i32)
    .bind(&event.description)
    .bind(event.metadata.src_port)
    .bind(event.metadata.dest_port)
    .bind(event.metadata.bytes_sent)
    .bind(event.metadata.bytes_received)
    .bind(event.metadata.status_code)
    .bind(event.metadata.protocol)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find_events(
    pool: &sqlx::Pool<MySql>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<AptEvent>, sqlx::Error> {
    let rows: Vec<EventRow> = sqlx::query_as(
        r#"
        SELECT id, start_time, end_time, source_ip, dest_ip, event_name, event_type, severity,
               description, src_port, dest_port, bytes_sent, bytes_received, status_code, protocol
        FROM apt_events
        WHERE start_time >= ? AND start_time <= ?
        ORDER BY start_time ASC
        "#,
    )
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(EventRow::into_event).collect())
}

pub async fn find_flows(
    pool: &sqlx::Pool<MySql>,
    client_ip: &str,
    t_lo: DateTime<Utc>,
    t_hi: DateTime<Utc>,
) -> Result<Vec<TcpFlow>, sqlx::Error> {
    sqlx::query_as::<_, TcpFlow>(
        r#"
        SELECT log_time, start_time, end_time, established_time, client_ip, client_port,
               server_ip, server_port, protocol, duration, up_bytes, down_bytes, up_bps,
               down_bps, packets_sent, packets_received, client_plr, server_plr, flow_status
        FROM tcp_flows
        WHERE client_ip = ? AND start_time >= ? AND start_time <= ?
        ORDER BY start_time ASC
        "#,
    )
    .bind(client_ip)
    .bind(t_lo)
    .bind(t_hi)
    .fetch_all(pool)
    .await
}

pub async fn find_alerts(pool: &sqlx::Pool<MySql>) -> Result<Vec<AttackAlert>, sqlx::Error> {
    sqlx::query_as::<_, AttackAlert>(
        r#"
        SELECT log_time, source_ip, dest_ip, event_type, protocol, action, severity
        FROM attack_alerts
        ORDER BY log_time ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn clear_graph(conn: &mut MySqlConnection) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM attack_edges").execute(&mut *conn).await?;
    sqlx::query("DELETE FROM attack_nodes").execute(&mut *conn).await?;
    Ok(())
}

pub async fn insert_node(conn: &mut MySqlConnection, node: &AttackNode) -> Result<(), sqlx::Error> {
    let related_log_ids = serde_json::to_string(&node.related_log_ids).unwrap_or_else(|_| "[]".into());
    sqlx::query(
        r#"
        INSERT INTO attack_nodes (phase, timestamp, source_ip, dest_ip, related_log_ids)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(node.phase.as_str())
    .bind(node.timestamp.timestamp())
    .bind(&node.source_ip)
    .bind(&node.dest_ip)
    .bind(related_log_ids)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_edge(conn: &mut MySqlConnection, edge: &AttackEdge) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO attack_edges (from_phase, to_phase, confidence, count, last_updated)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(edge.from.as_str())
    .bind(edge.to.as_str())
    .bind(edge.confidence)
    .bind(edge.count)
    .bind(Utc::now().timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> EventRow {
        EventRow {
            id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            source_ip: "1.1.1.1".into(),
            dest_ip: "2.2.2.2".into(),
            event_name: "ConnectionFrequency".into(),
            event_type: "InitialAccess".into(),
            severity: 3,
            description: "test".into(),
            src_port: None,
            dest_port: None,
            bytes_sent: None,
            bytes_received: None,
            status_code: None,
            protocol: None,
        }
    }

    #[test]
    fn into_event_parses_a_well_formed_row() {
        let event = sample_row().into_event().expect("row should parse");
        assert_eq!(event.event_name, EventKind::ConnectionFrequency);
        assert_eq!(event.event_type, Phase::InitialAccess);
        assert_eq!(event.severity, 3);
    }

    #[test]
    fn into_event_skips_a_row_with_an_unmapped_event_name() {
        let mut row = sample_row();
        row.event_name = "NotARealEventKind".into();
        assert!(row.into_event().is_none());
    }

    #[test]
    fn into_event_skips_a_row_with_an_unparsable_id() {
        let mut row = sample_row();
        row.id = "not-a-uuid".into();
        assert!(row.into_event().is_none());
    }
}
