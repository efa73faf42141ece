use serde::{Deserialize, Serialize};

use crate::internal::common::error::TaskingError;
use crate::internal::common::ids::{ApplicationId, BucketId, PlatformId, TagCategoryId, TagId};
use crate::internal::model::Referencing;

/// The entity a task operates on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Application(ApplicationId),
    Platform(PlatformId),
}

impl Subject {
    /// Builds the subject from the optional ids a request carries.
    /// Unset (zero) ids are ignored; setting both is rejected.
    pub fn from_ids(
        application: Option<ApplicationId>,
        platform: Option<PlatformId>,
    ) -> crate::Result<Option<Subject>> {
        let application = application.filter(|id| id.is_set());
        let platform = platform.filter(|id| id.is_set());
        match (application, platform) {
            (Some(_), Some(_)) => Err(TaskingError::BadRequest(
                "application and platform are mutually exclusive".to_string(),
            )),
            (Some(id), None) => Ok(Some(Subject::Application(id))),
            (None, Some(id)) => Ok(Some(Subject::Platform(id))),
            (None, None) => Ok(None),
        }
    }

    /// Key used to index tasks by subject.
    pub fn key(&self) -> String {
        match self {
            Self::Application(id) => format!("A:{id}"),
            Self::Platform(id) => format!("P:{id}"),
        }
    }

    pub fn application(&self) -> Option<ApplicationId> {
        match self {
            Self::Application(id) => Some(*id),
            Self::Platform(_) => None,
        }
    }

    pub fn platform(&self) -> Option<PlatformId> {
        match self {
            Self::Platform(id) => Some(*id),
            Self::Application(_) => None,
        }
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    pub bucket: Option<BucketId>,
    pub tags: Vec<TagId>,
}

impl Referencing for Application {
    fn bucket_refs(&self) -> Vec<BucketId> {
        self.bucket.into_iter().collect()
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub category: TagCategoryId,
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TagCategory {
    pub id: TagCategoryId,
    pub name: String,
}
