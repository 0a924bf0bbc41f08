use std::fmt;

use crate::error::{ClusterError, Result};

/// An ordered list of string fields. Field 0 is the command keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    fields: Vec<String>,
}

impl Message {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// A message made of a single keyword.
    pub fn keyword_only(keyword: &str) -> Self {
        Self::new([keyword])
    }

    pub fn keyword(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.fields.get(index + 1).map(String::as_str)
    }

    /// Argument `index` (0 is the first field after the keyword), or a malformed-message error.
    pub fn require_arg(&self, index: usize) -> Result<&str> {
        self.arg(index)
            .ok_or_else(|| ClusterError::malformed(self.keyword(), format!("missing field {}", index + 1)))
    }

    pub fn parse_arg<T: std::str::FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.require_arg(index)?;
        raw.parse()
            .map_err(|_| ClusterError::malformed(self.keyword(), format!("field {} is not valid: {:?}", index + 1, raw)))
    }

    pub fn args(&self) -> &[String] {
        self.fields.get(1..).unwrap_or(&[])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }

    pub fn kind<K: MessageKind>(&self) -> K {
        K::from_keyword(self.keyword())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join("|"))
    }
}

/// A role-specific view of the keyword in field 0.
///
/// Unknown keywords map to an `Unknown` variant rather than an error.
pub trait MessageKind: Sized + Copy {
    fn from_keyword(keyword: &str) -> Self;
}

/// Keywords understood before a connection has said what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyKind {
    Unknown,
    Id,
    Node,
    Job,
    Query,
    Shutdown,
}

impl MessageKind for IdentifyKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "id" => IdentifyKind::Id,
            "node" => IdentifyKind::Node,
            "job" => IdentifyKind::Job,
            "query" => IdentifyKind::Query,
            "kill" => IdentifyKind::Shutdown,
            _ => IdentifyKind::Unknown,
        }
    }
}

/// Keywords seen by the manager once a connection has identified itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Unknown,
    Send,
    NewJob,
    File,
    FileRead,
    Shutdown,
    NodeQuit,
    ConnectionQuit,
    NodeFinished,
    Results,
    SubmitJob,
    Status,
}

impl MessageKind for ManagerKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "send" => ManagerKind::Send,
            "job" => ManagerKind::NewJob,
            "file" => ManagerKind::File,
            "fileread" => ManagerKind::FileRead,
            "kill" => ManagerKind::Shutdown,
            "nodequit" => ManagerKind::NodeQuit,
            "connectionquit" => ManagerKind::ConnectionQuit,
            "finished" => ManagerKind::NodeFinished,
            "results" => ManagerKind::Results,
            "submit" => ManagerKind::SubmitJob,
            "status" => ManagerKind::Status,
            _ => ManagerKind::Unknown,
        }
    }
}

/// Keywords seen on the worker side of a node connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Unknown,
    Id,
    File,
    Send,
    FileRead,
    Execute,
    Finished,
    /// The manager is going away.
    Shutdown,
    /// This node is going away.
    Quit,
}

impl MessageKind for NodeKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "id" => NodeKind::Id,
            "file" => NodeKind::File,
            "send" => NodeKind::Send,
            "fileread" => NodeKind::FileRead,
            "execute" => NodeKind::Execute,
            "finished" => NodeKind::Finished,
            "shutdown" => NodeKind::Shutdown,
            "quit" => NodeKind::Quit,
            _ => NodeKind::Unknown,
        }
    }
}

/// Keywords seen on the submitter side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKind {
    Unknown,
    Id,
    Accept,
    Submit,
    Results,
    Shutdown,
    Quit,
}

impl MessageKind for SubmitKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "id" => SubmitKind::Id,
            "accept" => SubmitKind::Accept,
            "submit" => SubmitKind::Submit,
            "results" => SubmitKind::Results,
            "shutdown" => SubmitKind::Shutdown,
            "quit" => SubmitKind::Quit,
            _ => SubmitKind::Unknown,
        }
    }
}

/// One node's share of a job, as carried by a `file` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionAssignment {
    pub job_id: u64,
    pub section_id: usize,
    pub total_sections: usize,
    pub file_name: String,
    pub user_args: Vec<String>,
}

impl SectionAssignment {
    pub fn to_message(&self) -> Message {
        let mut fields = vec![
            "file".to_string(),
            self.job_id.to_string(),
            self.section_id.to_string(),
            self.total_sections.to_string(),
            self.file_name.clone(),
        ];
        fields.extend(self.user_args.iter().cloned());
        Message::new(fields)
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        let section = Self {
            job_id: msg.parse_arg(0)?,
            section_id: msg.parse_arg(1)?,
            total_sections: msg.parse_arg(2)?,
            file_name: msg.require_arg(3)?.to_string(),
            user_args: msg.args().get(4..).unwrap_or(&[]).to_vec(),
        };
        if section.total_sections == 0 || section.section_id >= section.total_sections {
            return Err(ClusterError::malformed(
                "file",
                format!("section {} of {}", section.section_id, section.total_sections),
            ));
        }
        Ok(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keywords_map_to_unknown() {
        let msg = Message::keyword_only("bogus");
        assert_eq!(msg.kind::<IdentifyKind>(), IdentifyKind::Unknown);
        assert_eq!(msg.kind::<ManagerKind>(), ManagerKind::Unknown);
        assert_eq!(msg.kind::<NodeKind>(), NodeKind::Unknown);
        assert_eq!(msg.kind::<SubmitKind>(), SubmitKind::Unknown);
    }

    #[test]
    fn same_keyword_means_different_things_per_role() {
        let msg = Message::new(["job", "{}"]);
        assert_eq!(msg.kind::<IdentifyKind>(), IdentifyKind::Job);
        assert_eq!(msg.kind::<ManagerKind>(), ManagerKind::NewJob);
        assert_eq!(msg.kind::<SubmitKind>(), SubmitKind::Unknown);
    }

    #[test]
    fn empty_message_has_empty_keyword() {
        let msg = Message::new(Vec::<String>::new());
        assert_eq!(msg.keyword(), "");
        assert!(msg.args().is_empty());
        assert_eq!(msg.kind::<NodeKind>(), NodeKind::Unknown);
    }

    #[test]
    fn parse_arg_reports_malformed_fields() {
        let msg = Message::new(["send", "abc"]);
        assert!(matches!(
            msg.parse_arg::<u64>(0),
            Err(ClusterError::MalformedMessage { .. })
        ));
        assert!(matches!(
            msg.parse_arg::<u64>(1),
            Err(ClusterError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn section_assignment_message_layout() {
        let section = SectionAssignment {
            job_id: 7,
            section_id: 1,
            total_sections: 2,
            file_name: "primes.json".to_string(),
            user_args: vec!["100".to_string(), "fast".to_string()],
        };
        let msg = section.to_message();
        assert_eq!(
            msg.fields(),
            &["file", "7", "1", "2", "primes.json", "100", "fast"]
        );
        assert_eq!(SectionAssignment::from_message(&msg).unwrap(), section);
    }

    #[test]
    fn section_assignment_rejects_out_of_range_section() {
        let msg = Message::new(["file", "7", "2", "2", "primes.json"]);
        assert!(SectionAssignment::from_message(&msg).is_err());

        let msg = Message::new(["file", "7", "0", "0", "primes.json"]);
        assert!(SectionAssignment::from_message(&msg).is_err());
    }
}
