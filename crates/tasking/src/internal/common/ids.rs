define_id_type!(TaskId, u64);
define_id_type!(TaskGroupId, u64);
define_id_type!(BucketId, u64);
define_id_type!(FileId, u64);
define_id_type!(ApplicationId, u64);
define_id_type!(PlatformId, u64);
define_id_type!(TagId, u64);
define_id_type!(TagCategoryId, u64);
